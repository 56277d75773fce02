//! Health check handler

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use transfer_core::models::StorageTier;
use utoipa::ToSchema;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const STORAGE_PROBE_KEY: &str = "health/probe";

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCheckResponse {
    pub status: String,
    pub database: String,
    pub storage: String,
    pub store_backend: String,
    pub storage_backend: String,
}

/// Run an async check with timeout; returns "healthy", "timeout", or "{prefix}: {error}".
async fn run_check<F, E>(f: F, error_prefix: &str) -> String
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(CHECK_TIMEOUT, f).await {
        Ok(Ok(())) => "healthy".to_string(),
        Ok(Err(e)) => format!("{}: {}", error_prefix, e),
        Err(_) => "timeout".to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service healthy", body = HealthCheckResponse),
        (status = 503, description = "A dependency is unhealthy", body = HealthCheckResponse)
    )
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthCheckResponse>) {
    let database = match &state.pool {
        Some(pool) => {
            run_check(
                async { sqlx::query("SELECT 1").execute(pool).await.map(|_| ()) },
                "unhealthy",
            )
            .await
        }
        None => "not_configured".to_string(),
    };

    let storage = run_check(
        async {
            state
                .storage
                .exists(StorageTier::Temporary, STORAGE_PROBE_KEY)
                .await
                .map(|_| ())
        },
        "unhealthy",
    )
    .await;

    let healthy = (database == "healthy" || database == "not_configured") && storage == "healthy";
    if !healthy {
        tracing::warn!(database = %database, storage = %storage, "Health check failed");
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthCheckResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            database,
            storage,
            store_backend: state.config.store_backend().to_string(),
            storage_backend: state.config.storage_backend().to_string(),
        }),
    )
}
