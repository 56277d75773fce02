use axum::http::HeaderValue;
use axum::{extract::Request, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Request ID extension type
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Request ID middleware
///
/// Reuses an incoming `X-Request-ID` or generates one, stores it in the request
/// extensions, records it on the current span and echoes it in the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let span = tracing::debug_span!("request", request_id = %request_id);
    let mut response = next.run(request).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Extract request ID from request extensions
pub fn get_request_id(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Extension, Router};
    use axum_test::TestServer;

    fn app() -> Router {
        Router::new()
            .route(
                "/echo",
                get(|Extension(id): Extension<RequestId>| async move { id.0 }),
            )
            .layer(axum::middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn test_generates_request_id() {
        let server = TestServer::new(app()).expect("Failed to create test server");
        let response = server.get("/echo").await;

        let header = response.header(REQUEST_ID_HEADER);
        let header = header.to_str().unwrap();
        assert!(Uuid::parse_str(header).is_ok());
        assert_eq!(response.text(), header);
    }

    #[tokio::test]
    async fn test_reuses_incoming_request_id() {
        let server = TestServer::new(app()).expect("Failed to create test server");
        let response = server
            .get("/echo")
            .add_header(REQUEST_ID_HEADER, "trace-abc-123")
            .await;

        assert_eq!(response.header(REQUEST_ID_HEADER), "trace-abc-123");
        assert_eq!(response.text(), "trace-abc-123");
    }
}
