//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;

use crate::state::AppState;
use anyhow::{Context, Result};
use std::sync::Arc;
use transfer_core::{Config, SystemClock};
use transfer_infra::{init_telemetry, LogFormat};

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    init_telemetry(LogFormat::from_env())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    // Fail fast on misconfiguration
    config
        .validate()
        .context("Configuration validation failed")?;
    tracing::info!(
        store_backend = %config.store_backend(),
        storage_backend = %config.storage_backend(),
        "Configuration loaded and validated successfully"
    );

    let state = services::initialize_services(&config, Arc::new(SystemClock)).await?;
    let router = routes::setup_routes(&config, state.clone())?;

    Ok((state, router))
}
