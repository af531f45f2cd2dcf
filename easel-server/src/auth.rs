//! Optional X-API-Key authentication.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use easel_core::AuthConfig;

use crate::api::{error_body, AppState};

/// Validates a request's API key against the configured key set.
///
/// Returns `Ok` when auth is disabled. When enabled with no keys
/// configured the deployment is broken, which surfaces as a 500 rather
/// than silently letting everything through.
pub fn check_api_key(
    auth: &AuthConfig,
    presented: Option<&str>,
) -> Result<(), (StatusCode, &'static str)> {
    if !auth.require_api_key {
        return Ok(());
    }
    if auth.api_keys.is_empty() {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "API key auth enabled but no keys configured",
        ));
    }
    match presented {
        None => Err((StatusCode::UNAUTHORIZED, "Missing X-API-Key header")),
        Some(key) if auth.api_keys.iter().any(|k| k == key) => Ok(()),
        Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid API key")),
    }
}

/// Middleware applied to the mutating routes (generate, purge).
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());

    match check_api_key(&state.auth, presented) {
        Ok(()) => next.run(request).await,
        Err((status, detail)) => (status, error_body(detail)).into_response(),
    }
}
