//! Per-request composition of the model cache and the bounded executor.

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use tracing::{error, info, warn};

use crate::{BoundedExecutor, EaselError, GenerationRequest, ModelCache};

/// How one generation request ended.
#[derive(Debug)]
pub enum Outcome {
    /// Generation finished within the deadline
    Completed {
        image: DynamicImage,
        seed: Option<u64>,
        model: String,
    },
    /// The request asked for something the service will not do
    Rejected(String),
    /// Loading or generating failed on the server side
    Failed(String),
    /// Generation exceeded the configured deadline
    TimedOut,
}

/// Stateless per-request driver: resolve the model id, acquire the handle,
/// run generation under the deadline, classify the result.
pub struct Orchestrator {
    cache: Arc<ModelCache>,
    executor: BoundedExecutor,
}

impl Orchestrator {
    pub fn new(cache: Arc<ModelCache>, executor: BoundedExecutor) -> Self {
        Self { cache, executor }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub async fn handle(&self, request: GenerationRequest) -> Outcome {
        // Fail fast with a clear message before touching any lock.
        let model_id = match self.cache.resolve(request.model.as_deref()) {
            Ok(id) => id,
            Err(err) => return Outcome::Rejected(err.to_string()),
        };

        let handle = match self.cache.acquire(Some(&model_id)).await {
            Ok(handle) => handle,
            Err(err @ EaselError::ModelNotAllowed { .. }) => {
                return Outcome::Rejected(err.to_string());
            }
            Err(err) => {
                error!(model = %model_id, error = %err, "model load failed");
                return Outcome::Failed(format!("Failed to load model '{model_id}'"));
            }
        };

        let started = Instant::now();
        let task_request = request.clone();
        let result = self
            .executor
            .run(move || handle.generate(&task_request))
            .await;

        match result {
            Ok(image) => {
                info!(
                    model = %model_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation completed"
                );
                Outcome::Completed {
                    image,
                    seed: request.seed,
                    model: model_id,
                }
            }
            Err(EaselError::Timeout { deadline }) => {
                warn!(model = %model_id, ?deadline, "generation timed out");
                Outcome::TimedOut
            }
            Err(err) => {
                // Log the underlying reason, hand the caller a flat message.
                error!(model = %model_id, error = %err, "generation failed");
                Outcome::Failed("Image generation failed".to_string())
            }
        }
    }
}
