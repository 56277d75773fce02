//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`. Admission
//! rejections render as a [`RejectionResponse`] so the upload widget can show
//! the message as is; everything else renders as an [`ErrorResponse`].

use axum::{
    extract::rejection::JsonRejection,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use transfer_core::{AppError, ErrorMetadata, LogLevel, Rejection, RejectionCode};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether this error is recoverable (can be retried)
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// Body returned when the admission policy turns a file away
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RejectionResponse {
    /// Always false
    pub accepted: bool,
    pub code: RejectionCode,
    /// Short message for the upload widget
    pub error: String,
    /// Longer message naming the file and the limit
    pub verbose_error: String,
}

impl From<&Rejection> for RejectionResponse {
    fn from(rejection: &Rejection) -> Self {
        Self {
            accepted: false,
            code: rejection.code,
            error: rejection.error.clone(),
            verbose_error: rejection.verbose_error.clone(),
        }
    }
}

/// Wrapper type for AppError to implement IntoResponse
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::from(err))
    }
}

impl From<validator::ValidationErrors> for HttpAppError {
    fn from(err: validator::ValidationErrors) -> Self {
        HttpAppError(AppError::from(err))
    }
}

impl From<JsonRejection> for HttpAppError {
    fn from(rejection: JsonRejection) -> Self {
        HttpAppError(AppError::InvalidInput(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

/// JSON body extractor that answers malformed bodies with an [`ErrorResponse`].
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = HttpAppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(HttpAppError::from)?;
        Ok(ValidatedJson(inner))
    }
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Request rejected");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Error occurred");
        }
    }
}

fn is_production_env() -> bool {
    std::env::var("ENVIRONMENT")
        .or_else(|_| std::env::var("APP_ENV"))
        .map(|env| env.to_lowercase() == "production" || env.to_lowercase() == "prod")
        .unwrap_or(false)
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;

        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        if let AppError::FileRejected(rejection) = app_error {
            return (status, Json(RejectionResponse::from(rejection))).into_response();
        }

        // Details never leave the process in production or for sensitive errors
        let show_details = !is_production_env() && !app_error.is_sensitive();
        let body = ErrorResponse {
            error: app_error.client_message(),
            details: show_details.then(|| app_error.detailed_message()),
            error_type: show_details.then(|| app_error.error_type().to_string()),
            code: app_error.error_code().to_string(),
            recoverable: app_error.is_recoverable(),
            suggested_action: app_error.suggested_action().map(String::from),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transfer_core::UploadPolicy;

    fn rejection() -> Rejection {
        UploadPolicy {
            max_single_upload_mb: 1,
            max_total_upload_mb: 1,
            max_total_upload_count: 1,
            accepted_formats: transfer_core::AcceptedFormats::new().with_group("Document", ["pdf"]),
        }
        .check_file("notes", "10", None)
        .unwrap_err()
    }

    #[test]
    fn test_rejection_maps_to_rejection_body() {
        let rejection = rejection();
        let body = RejectionResponse::from(&rejection);
        assert!(!body.accepted);
        assert_eq!(body.code, RejectionCode::MissingExtension);
        assert_eq!(body.error, rejection.error);
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (AppError::Gone("x".into()), StatusCode::GONE),
            (AppError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (AppError::FileRejected(rejection()), StatusCode::BAD_REQUEST),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(HttpAppError(error).into_response().status(), expected);
        }
    }
}
