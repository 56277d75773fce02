use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use transfer_core::models::{InProgressSubmission, SaveDraftRequest};
use uuid::Uuid;
use validator::Validate;

#[utoipa::path(
    post,
    path = "/api/v1/drafts",
    tag = "drafts",
    request_body = SaveDraftRequest,
    responses(
        (status = 201, description = "Draft saved", body = InProgressSubmission),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Draft or session not found", body = ErrorResponse),
        (status = 409, description = "Session belongs to another draft", body = ErrorResponse),
        (status = 410, description = "Session expired", body = ErrorResponse)
    )
)]
pub async fn save_draft(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<SaveDraftRequest>,
) -> Result<(StatusCode, Json<InProgressSubmission>), HttpAppError> {
    request.validate()?;
    let draft = state.sessions.save_draft(request).await?;
    Ok((StatusCode::CREATED, Json(draft)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/drafts/{id}",
    tag = "drafts",
    params(("id" = Uuid, Path, description = "Draft ID")),
    responses(
        (status = 204, description = "Draft abandoned"),
        (status = 404, description = "Draft not found", body = ErrorResponse)
    )
)]
pub async fn abandon_draft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HttpAppError> {
    state.sessions.abandon_draft(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
