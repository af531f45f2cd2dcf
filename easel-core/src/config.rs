//! Service configuration, read from the environment at process start.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_model() -> String {
    "stabilityai/sdxl-turbo".to_string()
}

fn default_cache_capacity() -> usize {
    2
}

fn default_max_inflight() -> usize {
    4
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Optional API-key authentication settings.
///
/// Disabled by default; when `REQUIRE_API_KEY` is set (to anything other
/// than `0`/`false`/`no`) requests must carry a key from `API_KEYS`
/// (comma-separated) or `API_KEY`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub require_api_key: bool,
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let require_api_key = lookup("REQUIRE_API_KEY")
            .map(|v| env_flag(&v))
            .unwrap_or(false);
        let api_keys = match lookup("API_KEYS") {
            Some(multi) => split_csv(&multi),
            None => lookup("API_KEY")
                .map(|k| vec![k.trim().to_string()])
                .unwrap_or_default(),
        };
        Self {
            require_api_key,
            api_keys,
        }
    }
}

/// Process-wide configuration for the cache, executor and server plumbing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Model id substituted when a request names none
    pub default_model: String,
    /// Model ids the service will agree to load
    pub allowed_models: Vec<String>,
    /// Maximum number of models held in memory simultaneously (>= 1)
    pub max_models_cache: usize,
    /// Wall-clock limit for one generation call; `None` disables it
    pub generation_timeout: Option<Duration>,
    /// Cap on simultaneous in-flight generation calls (>= 1)
    pub max_inflight: usize,
    /// Root directory for persisted images (`<data_dir>/images`)
    pub data_dir: PathBuf,
    pub auth: AuthConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let default_model = default_model();
        Self {
            allowed_models: vec![default_model.clone()],
            default_model,
            max_models_cache: default_cache_capacity(),
            generation_timeout: None,
            max_inflight: default_max_inflight(),
            data_dir: default_data_dir(),
            auth: AuthConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    ///
    /// Variables: `DEFAULT_MODEL`, `ALLOWED_MODELS`, `MAX_MODELS_CACHE`,
    /// `GENERATION_TIMEOUT_SECONDS`, `MAX_INFLIGHT_GENERATIONS`,
    /// `DATA_DIR`, `REQUIRE_API_KEY`, `API_KEY`/`API_KEYS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup. `from_env` goes
    /// through here; tests substitute a map instead of mutating the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default_model = lookup("DEFAULT_MODEL")
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().to_string())
            .unwrap_or_else(default_model);

        let mut allowed_models = lookup("ALLOWED_MODELS")
            .map(|v| split_csv(&v))
            .unwrap_or_default();
        if allowed_models.is_empty() {
            allowed_models.push(default_model.clone());
        }

        let max_models_cache = lookup("MAX_MODELS_CACHE")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or_else(default_cache_capacity)
            .max(1);

        let generation_timeout = lookup("GENERATION_TIMEOUT_SECONDS")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64);

        let max_inflight = lookup("MAX_INFLIGHT_GENERATIONS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or_else(default_max_inflight)
            .max(1);

        let data_dir = lookup("DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Self {
            default_model,
            allowed_models,
            max_models_cache,
            generation_timeout,
            max_inflight,
            data_dir,
            auth: AuthConfig::from_lookup(&|name| lookup(name)),
        }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }
}

fn env_flag(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "" | "0" | "false" | "no")
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = ServiceConfig::from_lookup(|_| None);
        assert_eq!(config.default_model, "stabilityai/sdxl-turbo");
        assert_eq!(config.allowed_models, vec![config.default_model.clone()]);
        assert_eq!(config.max_models_cache, 2);
        assert!(config.generation_timeout.is_none());
        assert!(!config.auth.require_api_key);
    }

    #[test]
    fn parses_allow_list_and_capacity() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("DEFAULT_MODEL", "model-a"),
            ("ALLOWED_MODELS", "model-a, model-b ,model-c"),
            ("MAX_MODELS_CACHE", "3"),
        ]));
        assert_eq!(config.default_model, "model-a");
        assert_eq!(config.allowed_models, vec!["model-a", "model-b", "model-c"]);
        assert_eq!(config.max_models_cache, 3);
    }

    #[test]
    fn capacity_clamps_to_one() {
        let config = ServiceConfig::from_lookup(lookup_from(&[("MAX_MODELS_CACHE", "0")]));
        assert_eq!(config.max_models_cache, 1);
    }

    #[test]
    fn timeout_disabled_for_non_positive_values() {
        for value in ["0", "-1", "not-a-number"] {
            let config = ServiceConfig::from_lookup(lookup_from(&[(
                "GENERATION_TIMEOUT_SECONDS",
                value,
            )]));
            assert!(config.generation_timeout.is_none(), "value {value:?}");
        }
        let config = ServiceConfig::from_lookup(lookup_from(&[(
            "GENERATION_TIMEOUT_SECONDS",
            "1.5",
        )]));
        assert_eq!(config.generation_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn auth_prefers_multi_key_list() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("REQUIRE_API_KEY", "1"),
            ("API_KEYS", "alpha, beta"),
            ("API_KEY", "ignored"),
        ]));
        assert!(config.auth.require_api_key);
        assert_eq!(config.auth.api_keys, vec!["alpha", "beta"]);
    }

    #[test]
    fn auth_flag_off_values() {
        for value in ["0", "false", "no"] {
            let config =
                ServiceConfig::from_lookup(lookup_from(&[("REQUIRE_API_KEY", value)]));
            assert!(!config.auth.require_api_key, "value {value:?}");
        }
    }
}
