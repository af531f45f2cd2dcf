//! HTTP routes, handlers and request/response schemas.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use easel_core::{
    AuthConfig, BoundedExecutor, GenerationRequest, ModelCache, ModelLoader, Orchestrator,
    Outcome, ServiceConfig, DEFAULT_CFG, DEFAULT_HEIGHT, DEFAULT_STEPS, DEFAULT_WIDTH,
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth;
use crate::storage::ImageStore;

const DEFAULT_NEGATIVE_PROMPT: &str = "low quality, bad anatomy, watermark";

/// Shared application state: orchestrator, cache, image store, job registry.
pub struct AppState {
    pub cache: Arc<ModelCache>,
    pub orchestrator: Orchestrator,
    pub store: ImageStore,
    pub jobs: Mutex<HashMap<String, JobStatus>>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(config: &ServiceConfig, loader: Arc<dyn ModelLoader>) -> anyhow::Result<Self> {
        let cache = Arc::new(ModelCache::new(config, loader));
        let executor = BoundedExecutor::new(config.generation_timeout, config.max_inflight);
        let orchestrator = Orchestrator::new(Arc::clone(&cache), executor);
        let store = ImageStore::new(config.images_dir())?;
        Ok(Self {
            cache,
            orchestrator,
            store,
            jobs: Mutex::new(HashMap::new()),
            auth: config.auth.clone(),
        })
    }
}

// ---- schemas ----

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_HEIGHT
}

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

fn default_cfg() -> f32 {
    DEFAULT_CFG
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateParams {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg")]
    pub cfg: f32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    /// Also return the PNG inline as base64
    #[serde(default)]
    pub b64: bool,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            steps: default_steps(),
            cfg: default_cfg(),
            seed: None,
            model: None,
            b64: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub params: GenerateParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Rejected,
}

#[derive(Serialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub status: JobState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageItem {
    pub image_id: String,
    pub url: String,
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub status: JobState,
    pub images: Vec<ImageItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HashMap<String, String>>,
}

#[derive(Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub loaded: bool,
}

#[derive(Serialize)]
pub struct ModelsResponse {
    pub default_model: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeRequest {
    pub model_id: Option<String>,
}

#[derive(Serialize)]
pub struct PurgeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub removed: usize,
    pub remaining: usize,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

pub fn error_body(detail: impl Into<String>) -> Json<ErrorBody> {
    Json(ErrorBody {
        detail: detail.into(),
    })
}

// ---- handlers ----

async fn health() -> impl IntoResponse {
    Json(HealthStatus { status: "ok" })
}

async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models = state
        .cache
        .allowed_models()
        .iter()
        .map(|name| ModelInfo {
            name: name.clone(),
            loaded: state.cache.is_loaded(name),
        })
        .collect();
    Json(ModelsResponse {
        default_model: state.cache.default_model().to_string(),
        models,
    })
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> Response {
    if let Err(detail) = validate_params(&body.params) {
        return (StatusCode::BAD_REQUEST, error_body(detail)).into_response();
    }

    let negative = body
        .negative_prompt
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_NEGATIVE_PROMPT.to_string());

    let request = GenerationRequest {
        prompt: body.prompt.trim().to_string(),
        negative_prompt: Some(negative),
        width: Some(body.params.width),
        height: Some(body.params.height),
        steps: Some(body.params.steps),
        cfg: Some(body.params.cfg),
        seed: body.params.seed,
        model: body.params.model.clone(),
    };

    match state.orchestrator.handle(request).await {
        Outcome::Completed { image, seed, model } => {
            let image_id = ImageStore::new_image_id();
            if let Err(err) = state.store.save_png(&image_id, &image) {
                error!(error = %err, "failed to persist image");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("Failed to persist image"),
                )
                    .into_response();
            }

            let b64 = if body.params.b64 {
                match image_to_base64_png(&image) {
                    Ok(encoded) => Some(encoded),
                    Err(err) => {
                        error!(error = %err, "failed to encode image");
                        None
                    }
                }
            } else {
                None
            };

            let item = ImageItem {
                image_id: image_id.clone(),
                url: state.store.url_for(&image_id),
                seed,
                b64,
            };
            let job_id = format!("jb_{}", &image_id[3..]);
            let status = JobStatus {
                status: JobState::Completed,
                images: vec![item],
                audit: Some(HashMap::from([
                    ("policy".to_string(), "standard".to_string()),
                    ("model".to_string(), model),
                ])),
                error: None,
            };
            state.jobs.lock().unwrap().insert(job_id.clone(), status);

            Json(JobAccepted {
                job_id,
                status: JobState::Completed,
            })
            .into_response()
        }
        Outcome::Rejected(reason) => {
            (StatusCode::BAD_REQUEST, error_body(reason)).into_response()
        }
        Outcome::TimedOut => (
            StatusCode::GATEWAY_TIMEOUT,
            error_body("Generation timeout exceeded"),
        )
            .into_response(),
        Outcome::Failed(reason) => {
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(reason)).into_response()
        }
    }
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    match state.jobs.lock().unwrap().get(&job_id).cloned() {
        Some(status) => Json(status).into_response(),
        None => (StatusCode::NOT_FOUND, error_body("Job not found")).into_response(),
    }
}

async fn purge_models(
    State(state): State<Arc<AppState>>,
    body: Option<Json<PurgeRequest>>,
) -> impl IntoResponse {
    let model_id = body.and_then(|Json(req)| req.model_id);
    let report = state.cache.purge(model_id.as_deref());
    Json(PurgeResponse {
        model_id,
        removed: report.removed,
        remaining: report.remaining,
    })
}

// ---- router ----

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/generate", post(generate))
        .route("/v1/models/purge", post(purge_models))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/jobs/{job_id}", get(job_status))
        .merge(protected)
        .nest_service("/file", ServeDir::new(state.store.images_dir()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn validate_params(params: &GenerateParams) -> Result<(), &'static str> {
    if params.width > 2048 || params.height > 2048 {
        return Err("Max size is 2048x2048");
    }
    if params.width < 64 || params.height < 64 {
        return Err("Min size is 64x64");
    }
    if params.steps < 1 || params.steps > 100 || params.cfg < 0.0 || params.cfg > 20.0 {
        return Err("Steps/CFG exceed allowed limits");
    }
    Ok(())
}

/// Encode an image as a base64 PNG string.
fn image_to_base64_png(img: &DynamicImage) -> anyhow::Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(BASE64_STANDARD.encode(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use easel_core::{ImageModel, PreviewLoader, PreviewModel};

    fn params(width: u32, height: u32, steps: u32, cfg: f32) -> GenerateParams {
        GenerateParams {
            width,
            height,
            steps,
            cfg,
            ..GenerateParams::default()
        }
    }

    #[test]
    fn validation_bounds() {
        assert!(validate_params(&GenerateParams::default()).is_ok());
        assert_eq!(
            validate_params(&params(4096, 512, 25, 7.5)),
            Err("Max size is 2048x2048")
        );
        assert_eq!(
            validate_params(&params(512, 16, 25, 7.5)),
            Err("Min size is 64x64")
        );
        assert_eq!(
            validate_params(&params(512, 512, 101, 7.5)),
            Err("Steps/CFG exceed allowed limits")
        );
        assert_eq!(
            validate_params(&params(512, 512, 25, 20.5)),
            Err("Steps/CFG exceed allowed limits")
        );
    }

    #[test]
    fn generate_body_fills_defaults() {
        let body: GenerateBody =
            serde_json::from_str(r#"{"prompt": "a house"}"#).unwrap();
        assert_eq!(body.prompt, "a house");
        assert!(body.negative_prompt.is_none());
        assert_eq!(body.params.width, DEFAULT_WIDTH);
        assert_eq!(body.params.steps, DEFAULT_STEPS);
        assert!(!body.params.b64);
    }

    #[test]
    fn job_status_serializes_like_the_api_contract() {
        let status = JobStatus {
            status: JobState::Completed,
            images: vec![ImageItem {
                image_id: "im_00000000".to_string(),
                url: "/file/im_00000000.png".to_string(),
                seed: Some(5),
                b64: None,
            }],
            audit: Some(HashMap::from([(
                "model".to_string(),
                "preview".to_string(),
            )])),
            error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["images"][0]["image_id"], "im_00000000");
        assert!(json["images"][0].get("b64").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["audit"]["model"], "preview");
    }

    #[test]
    fn base64_encoding_round_trips_header() {
        let image = PreviewModel::new("preview")
            .generate(&{
                let mut req = easel_core::GenerationRequest::new("encode me");
                req.width = Some(16);
                req.height = Some(16);
                req
            })
            .unwrap();
        let encoded = image_to_base64_png(&image).unwrap();
        let decoded = BASE64_STANDARD.decode(encoded).unwrap();
        // PNG magic bytes
        assert_eq!(&decoded[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[tokio::test]
    async fn generate_flow_records_a_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            default_model: "preview".to_string(),
            allowed_models: vec!["preview".to_string()],
            data_dir: dir.path().to_path_buf(),
            ..ServiceConfig::default()
        };
        let state = Arc::new(AppState::new(&config, Arc::new(PreviewLoader)).unwrap());

        let body = GenerateBody {
            prompt: "a quiet harbor".to_string(),
            negative_prompt: None,
            params: params(64, 64, 1, 1.0),
        };
        let response = generate(State(Arc::clone(&state)), Json(body)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let jobs = state.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        let (job_id, status) = jobs.iter().next().unwrap();
        assert!(job_id.starts_with("jb_"));
        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.images.len(), 1);
        assert_eq!(
            status.audit.as_ref().unwrap()["model"],
            "preview"
        );
        let saved = state
            .store
            .images_dir()
            .join(format!("{}.png", status.images[0].image_id));
        assert!(saved.exists());
    }

    #[tokio::test]
    async fn generate_rejects_disallowed_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            default_model: "preview".to_string(),
            allowed_models: vec!["preview".to_string()],
            data_dir: dir.path().to_path_buf(),
            ..ServiceConfig::default()
        };
        let state = Arc::new(AppState::new(&config, Arc::new(PreviewLoader)).unwrap());

        let mut generate_params = params(64, 64, 1, 1.0);
        generate_params.model = Some("not-in-allowed".to_string());
        let body = GenerateBody {
            prompt: "a tree".to_string(),
            negative_prompt: None,
            params: generate_params,
        };
        let response = generate(State(state), Json(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
