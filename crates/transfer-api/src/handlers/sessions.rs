use crate::constants::UPLOAD_FIELD;
use crate::error::{ErrorResponse, HttpAppError, RejectionResponse};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use transfer_core::models::{CreateSessionRequest, FileResponse, SessionResponse};
use transfer_core::AppError;

#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    tag = "sessions",
    request_body(content = CreateSessionRequest, description = "May be omitted for an anonymous session"),
    responses(
        (status = 201, description = "Upload session created", body = SessionResponse),
        (status = 400, description = "Invalid request body", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionResponse>), HttpAppError> {
    // An empty body opens an anonymous session
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(AppError::from)?
    };

    let session = state.sessions.create_session(request.user_id).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    get,
    path = "/api/v1/sessions/{token}",
    tag = "sessions",
    params(("token" = String, Path, description = "Session token")),
    responses(
        (status = 200, description = "Session state", body = SessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<SessionResponse>, HttpAppError> {
    Ok(Json(state.sessions.get_session(&token).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{token}/files",
    tag = "sessions",
    params(("token" = String, Path, description = "Session token")),
    request_body(content = inline(Object), content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored in the session", body = FileResponse),
        (status = 400, description = "File rejected", body = RejectionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session does not accept files", body = ErrorResponse),
        (status = 410, description = "Session expired", body = ErrorResponse),
        (status = 413, description = "File or session too large", body = RejectionResponse)
    )
)]
#[tracing::instrument(skip(state, multipart), fields(session_token = %token))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<FileResponse>, HttpAppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(base_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::InvalidInput("Uploaded file has no filename".to_string()))?;
        let data = field.bytes().await.map_err(multipart_error)?;

        let file = state.sessions.add_file(&token, &filename, data).await?;
        return Ok(Json(file));
    }

    Err(AppError::InvalidInput(format!("Missing multipart field '{}'", UPLOAD_FIELD)).into())
}

#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{token}/files/{name}",
    tag = "sessions",
    params(
        ("token" = String, Path, description = "Session token"),
        ("name" = String, Path, description = "File name")
    ),
    responses(
        (status = 200, description = "File removed", body = SessionResponse),
        (status = 404, description = "Session or file not found", body = ErrorResponse),
        (status = 409, description = "Session is not uploading", body = ErrorResponse)
    )
)]
pub async fn remove_file(
    State(state): State<Arc<AppState>>,
    Path((token, name)): Path<(String, String)>,
) -> Result<Json<SessionResponse>, HttpAppError> {
    Ok(Json(state.sessions.remove_file(&token, &name).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{token}/finalize",
    tag = "sessions",
    params(("token" = String, Path, description = "Session token")),
    responses(
        (status = 200, description = "Promotion queued", body = SessionResponse),
        (status = 400, description = "Session has no files", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Promotion already in flight or done", body = ErrorResponse),
        (status = 410, description = "Session expired", body = ErrorResponse)
    )
)]
pub async fn finalize_session(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<SessionResponse>, HttpAppError> {
    Ok(Json(state.sessions.finalize(&token).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{token}/retry",
    tag = "sessions",
    params(("token" = String, Path, description = "Session token")),
    responses(
        (status = 200, description = "Promotion queued again", body = SessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session did not fail", body = ErrorResponse)
    )
)]
pub async fn retry_session(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<SessionResponse>, HttpAppError> {
    Ok(Json(state.sessions.retry(&token).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{token}/resume",
    tag = "sessions",
    params(("token" = String, Path, description = "Session token")),
    responses(
        (status = 200, description = "Session open for uploads", body = SessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session can not be resumed", body = ErrorResponse)
    )
)]
pub async fn resume_session(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<SessionResponse>, HttpAppError> {
    Ok(Json(state.sessions.resume(&token).await?))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::InvalidInput(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// Last path component of a client-supplied filename.
fn base_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim().to_string()
}
