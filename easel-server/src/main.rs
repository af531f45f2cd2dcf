use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use easel_core::{PreviewLoader, ServiceConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod storage;

// Define command line arguments; everything else comes from the environment.
#[derive(Parser, Debug)]
#[command(author, version, about = "Easel image generation server")]
struct Args {
    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8001)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServiceConfig::from_env();
    info!(
        default_model = %config.default_model,
        allowed = config.allowed_models.len(),
        cache_capacity = config.max_models_cache,
        timeout = ?config.generation_timeout,
        "starting easel"
    );

    let state = Arc::new(api::AppState::new(&config, Arc::new(PreviewLoader))?);
    let app = api::router(state);

    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
