//! Route configuration and setup

use crate::api_doc::ApiDoc;
use crate::constants::{API_PREFIX, OPENAPI_PATH};
use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::map_response_body::MapResponseBodyLayer;
use tower_http::trace::TraceLayer;
use transfer_core::Config;
use transfer_infra::{request_id_middleware, security_headers_middleware};
use utoipa::OpenApi;

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;
    let max_body_bytes = config.max_request_body_bytes();
    tracing::info!(max_body_bytes, "Request body limit set");

    let app = Router::new()
        .nest(API_PREFIX, api_routes())
        .route("/health", get(handlers::health::health_check))
        .route(OPENAPI_PATH, get(|| async { Json(ApiDoc::openapi()) }))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(security_headers_middleware))
                .layer(axum::middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(MapResponseBodyLayer::new(axum::body::Body::new))
                .layer(RequestBodyLimitLayer::new(max_body_bytes))
                .layer(DefaultBodyLimit::disable()),
        )
        .with_state(state);

    Ok(app)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(handlers::sessions::create_session))
        .route("/sessions/{token}", get(handlers::sessions::get_session))
        .route(
            "/sessions/{token}/files",
            post(handlers::sessions::upload_file),
        )
        .route(
            "/sessions/{token}/files/{name}",
            delete(handlers::sessions::remove_file),
        )
        .route(
            "/sessions/{token}/finalize",
            post(handlers::sessions::finalize_session),
        )
        .route(
            "/sessions/{token}/retry",
            post(handlers::sessions::retry_session),
        )
        .route(
            "/sessions/{token}/resume",
            post(handlers::sessions::resume_session),
        )
        .route("/uploads/check", post(handlers::uploads::check_file))
        .route("/drafts", post(handlers::drafts::save_draft))
        .route("/drafts/{id}", delete(handlers::drafts::abandon_draft))
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let cors = if config.cors_origins().iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins()
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    };
    Ok(cors)
}
