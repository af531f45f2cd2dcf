pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod loader;
pub mod orchestrator;
mod preview;

pub use cache::{ModelCache, PurgeReport};
pub use config::{AuthConfig, ServiceConfig};
pub use error::{EaselError, Result};
pub use executor::BoundedExecutor;
use image::DynamicImage;
pub use loader::ModelLoader;
pub use orchestrator::{Orchestrator, Outcome};
pub use preview::{PreviewLoader, PreviewModel};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 1024;
pub const DEFAULT_STEPS: u32 = 25;
pub const DEFAULT_CFG: f32 = 7.5;

// Define the request type shared by the cache, executor and server.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub cfg: Option<f32>,
    pub seed: Option<u64>,
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: None,
            height: None,
            steps: None,
            cfg: None,
            seed: None,
            model: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width.unwrap_or(DEFAULT_WIDTH)
    }

    pub fn height(&self) -> u32 {
        self.height.unwrap_or(DEFAULT_HEIGHT)
    }

    pub fn steps(&self) -> u32 {
        self.steps.unwrap_or(DEFAULT_STEPS)
    }

    pub fn cfg(&self) -> f32 {
        self.cfg.unwrap_or(DEFAULT_CFG)
    }
}

/// A loaded, ready-to-use generative model. Implementations are expensive to
/// construct and `generate` is a blocking call; callers run it through the
/// [`BoundedExecutor`] rather than directly on an async task.
pub trait ImageModel: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> anyhow::Result<DynamicImage>;
}

impl std::fmt::Debug for dyn ImageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ImageModel")
    }
}
