use std::time::Duration;

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, EaselError>;

/// Failure kinds surfaced by the cache, executor and orchestrator
#[derive(Debug, Error)]
pub enum EaselError {
    /// Requested (or default) model id is not in the configured allow-list
    #[error("Model '{model}' not allowed")]
    ModelNotAllowed {
        /// The rejected model id
        model: String,
    },

    /// Constructing a model handle failed; the cache is left unchanged
    #[error("Failed to load model '{model}': {source}")]
    LoadFailure {
        /// The model id whose load failed
        model: String,
        /// Underlying loader error
        #[source]
        source: anyhow::Error,
    },

    /// Generation exceeded the configured deadline
    #[error("Generation timeout after {deadline:?}")]
    Timeout {
        /// The deadline that expired
        deadline: Duration,
    },

    /// The generation call itself failed
    #[error("Generation failed: {0}")]
    Generation(#[source] anyhow::Error),
}
