//! OpenAPI documentation, served at `/api/openapi.json`.

use utoipa::OpenApi;

use crate::error::{ErrorResponse, RejectionResponse};
use crate::handlers;
use transfer_core::models;
use transfer_core::RejectionCode;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Records Transfer API",
        version = "0.1.0",
        description = "Upload sessions for the records-transfer portal: open a session, add files checked against the admission policy, then finalize to copy them into permanent storage. All endpoints are versioned under /api/v1/."
    ),
    paths(
        handlers::sessions::create_session,
        handlers::sessions::get_session,
        handlers::sessions::upload_file,
        handlers::sessions::remove_file,
        handlers::sessions::finalize_session,
        handlers::sessions::retry_session,
        handlers::sessions::resume_session,
        handlers::uploads::check_file,
        handlers::drafts::save_draft,
        handlers::drafts::abandon_draft,
        handlers::health::health_check,
    ),
    components(schemas(
        models::CreateSessionRequest,
        models::SessionResponse,
        models::SessionStatus,
        models::FileResponse,
        models::StorageTier,
        models::CheckFileRequest,
        models::CheckFileResponse,
        models::SaveDraftRequest,
        models::InProgressSubmission,
        RejectionCode,
        RejectionResponse,
        ErrorResponse,
        handlers::health::HealthCheckResponse,
    )),
    tags(
        (name = "sessions", description = "Upload session lifecycle"),
        (name = "uploads", description = "Admission pre-checks"),
        (name = "drafts", description = "In-progress submissions"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;
