mod analysis;
mod catalog;
mod config;
mod engine;
mod errors;
mod families;
mod manager;
mod routes;
mod state;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::engine::VllmBackend;
use crate::manager::ModelManager;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting model service v{}", env!("CARGO_PKG_VERSION"));

    // Load the model catalog
    let catalog = Catalog::load(&config.catalog_path).with_context(|| {
        format!(
            "Failed to load model catalog from {}",
            config.catalog_path.display()
        )
    })?;
    info!(
        "Model catalog loaded (default model: {})",
        catalog.default_model
    );

    // Initialize the engine backend
    let backend = VllmBackend::new(config.engine.clone(), catalog.env_pairs())
        .context("Failed to initialize engine backend")?;
    info!(
        "Engine backend: {} on {}:{}",
        config.engine.vllm_bin, config.engine.host, config.engine.port
    );

    let manager = Arc::new(ModelManager::new(Arc::new(catalog), Arc::new(backend)));

    // The first load can take minutes; serve /status while it runs.
    {
        let manager = manager.clone();
        tokio::spawn(async move { manager.initialize_default().await });
    }

    let state = AppState {
        manager: manager.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
    }
}
