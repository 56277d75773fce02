//! Transfer API Library
//!
//! HTTP handlers, error mapping and application setup for the upload service.

mod api_doc;
pub mod constants;
mod handlers;
pub mod setup;

pub mod error;
pub mod state;

pub use error::{ErrorResponse, HttpAppError, RejectionResponse};
pub use state::AppState;
