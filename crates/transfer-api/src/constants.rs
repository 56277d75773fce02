//! API constants

/// API version segment used in every route.
pub const API_VERSION: &str = "v1";

/// Versioned route prefix.
pub const API_PREFIX: &str = "/api/v1";

/// Where the OpenAPI document is served.
pub const OPENAPI_PATH: &str = "/api/openapi.json";

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "file";
