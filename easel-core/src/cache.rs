//! Bounded LRU cache of loaded model handles with single-flight loading.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as LoadLock;
use tokio::task;
use tracing::{debug, info};

use crate::{EaselError, ImageModel, ModelLoader, Result, ServiceConfig};

/// Counts reported by [`ModelCache::purge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    /// Entries removed by this call (0 or 1 for a targeted purge)
    pub removed: usize,
    /// Entries still resident afterwards
    pub remaining: usize,
}

/// Resident handles plus their recency order. Guarded by one mutex that is
/// only ever held for O(1) map work, never across a load or a generation.
struct CacheState {
    entries: HashMap<String, Arc<dyn ImageModel>>,
    /// Keys ordered least- to most-recently used
    recency: Vec<String>,
}

/// Capacity-bounded, least-recently-used cache of loaded models.
///
/// `acquire` resolves and validates the id, promotes on a hit, and on a
/// miss loads the model under a per-id lock so that concurrent requests
/// for the same unloaded model trigger exactly one construction. Loads
/// for distinct ids proceed in parallel.
pub struct ModelCache {
    default_model: String,
    allowed_models: Vec<String>,
    capacity: usize,
    loader: Arc<dyn ModelLoader>,
    state: Mutex<CacheState>,
    load_locks: Mutex<HashMap<String, Arc<LoadLock<()>>>>,
}

impl ModelCache {
    pub fn new(config: &ServiceConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            default_model: config.default_model.clone(),
            allowed_models: config.allowed_models.clone(),
            capacity: config.max_models_cache.max(1),
            loader,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: Vec::new(),
            }),
            load_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an optional model id to a validated allow-listed id.
    /// `None` or an empty string selects the configured default.
    pub fn resolve(&self, model_id: Option<&str>) -> Result<String> {
        let id = match model_id {
            Some(id) if !id.trim().is_empty() => id.trim(),
            _ => self.default_model.as_str(),
        };
        if !self.allowed_models.iter().any(|m| m == id) {
            return Err(EaselError::ModelNotAllowed {
                model: id.to_string(),
            });
        }
        Ok(id.to_string())
    }

    /// Return the handle for `model_id`, loading it on a miss.
    pub async fn acquire(&self, model_id: Option<&str>) -> Result<Arc<dyn ImageModel>> {
        let id = self.resolve(model_id)?;

        // Fast path: resident, only the promotion touches the cache lock.
        if let Some(handle) = self.promote(&id) {
            debug!(model = %id, "model cache hit");
            return Ok(handle);
        }

        // Slow path: serialize loads of this id. The lock table's own
        // mutex is released before waiting on the per-id lock so unrelated
        // loads never serialize on it.
        let load_lock = self.load_lock(&id);
        let _guard = load_lock.lock().await;

        // Another caller may have finished the load while we waited.
        if let Some(handle) = self.promote(&id) {
            debug!(model = %id, "model cache hit after load wait");
            return Ok(handle);
        }

        info!(model = %id, "loading model");
        let loader = Arc::clone(&self.loader);
        let target = id.clone();
        let handle = task::spawn_blocking(move || loader.load(&target))
            .await
            .map_err(|join_err| EaselError::LoadFailure {
                model: id.clone(),
                source: anyhow::Error::new(join_err),
            })?
            .map_err(|source| EaselError::LoadFailure {
                model: id.clone(),
                source,
            })?;

        self.insert(&id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop one resident model, or all of them when `model_id` is `None`.
    /// Only touches what is resident at the moment of the call; in-flight
    /// loads are unaffected and land in the cache afterwards.
    pub fn purge(&self, model_id: Option<&str>) -> PurgeReport {
        let mut state = self.state.lock().unwrap();
        let removed = match model_id {
            Some(id) => {
                if state.entries.remove(id).is_some() {
                    state.recency.retain(|key| key != id);
                    info!(model = %id, "purged model");
                    1
                } else {
                    0
                }
            }
            None => {
                let count = state.entries.len();
                state.entries.clear();
                state.recency.clear();
                if count > 0 {
                    info!(count, "purged all models");
                }
                count
            }
        };
        PurgeReport {
            removed,
            remaining: state.entries.len(),
        }
    }

    /// Resident model ids, least- to most-recently used.
    pub fn loaded_models(&self) -> Vec<String> {
        self.state.lock().unwrap().recency.clone()
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.state.lock().unwrap().entries.contains_key(model_id)
    }

    pub fn allowed_models(&self) -> &[String] {
        &self.allowed_models
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Promote `id` to most-recently-used and return its handle.
    fn promote(&self, id: &str) -> Option<Arc<dyn ImageModel>> {
        let mut state = self.state.lock().unwrap();
        let handle = state.entries.get(id).cloned()?;
        if let Some(pos) = state.recency.iter().position(|key| key == id) {
            let key = state.recency.remove(pos);
            state.recency.push(key);
        }
        Some(handle)
    }

    /// Insert as most-recently-used and evict past capacity. Runs strictly
    /// after a successful load, under the cache lock; any concurrent
    /// acquire for the victim's id afterwards simply misses and reloads.
    fn insert(&self, id: &str, handle: Arc<dyn ImageModel>) {
        let mut state = self.state.lock().unwrap();
        if state.entries.insert(id.to_string(), handle).is_none() {
            state.recency.push(id.to_string());
        } else if let Some(pos) = state.recency.iter().position(|key| key == id) {
            let key = state.recency.remove(pos);
            state.recency.push(key);
        }
        while state.entries.len() > self.capacity {
            let victim = state.recency.remove(0);
            state.entries.remove(&victim);
            info!(model = %victim, "evicted least recently used model");
        }
    }

    /// Per-id load lock, created on first use under the table's mutex.
    fn load_lock(&self, id: &str) -> Arc<LoadLock<()>> {
        let mut locks = self.load_locks.lock().unwrap();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    #[cfg(test)]
    fn load_lock_count(&self) -> usize {
        self.load_locks.lock().unwrap().len()
    }
}
