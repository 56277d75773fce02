//! Transfer Infrastructure Library
//!
//! Shared plumbing for the HTTP service:
//! - Middleware (request ID, security headers)
//! - Tracing subscriber initialization

pub mod middleware;
pub mod telemetry;

pub use middleware::{
    get_request_id, request_id_middleware, security_headers_middleware, RequestId,
    REQUEST_ID_HEADER,
};
pub use telemetry::{init_telemetry, LogFormat};
