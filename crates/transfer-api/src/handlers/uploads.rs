use crate::error::{ErrorResponse, HttpAppError, RejectionResponse, ValidatedJson};
use crate::state::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;
use transfer_core::models::{CheckFileRequest, CheckFileResponse};
use validator::Validate;

/// Run the admission checks for a file before it is sent.
#[utoipa::path(
    post,
    path = "/api/v1/uploads/check",
    tag = "uploads",
    request_body = CheckFileRequest,
    responses(
        (status = 200, description = "File would be accepted", body = CheckFileResponse),
        (status = 400, description = "File would be rejected", body = RejectionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 413, description = "File or session too large", body = RejectionResponse)
    )
)]
pub async fn check_file(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CheckFileRequest>,
) -> Result<Json<CheckFileResponse>, HttpAppError> {
    request.validate()?;
    state
        .sessions
        .check_file(
            request.session_token.as_deref(),
            &request.filename,
            &request.filesize,
        )
        .await?;
    Ok(Json(CheckFileResponse { accepted: true }))
}
