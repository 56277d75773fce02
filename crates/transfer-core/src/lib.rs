//! Transfer Core Library
//!
//! Domain models, the file admission policy, configuration, error types and
//! the clock abstraction shared by every crate of the upload service.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod job_error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use admission::{AcceptedFormats, Rejection, RejectionCode, UploadPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Config, JobQueueSettings, LifecycleSettings, PromotionSettings, SmtpSettings, TransferConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use job_error::{JobError, JobResultExt};
pub use storage_types::{StorageBackend, StoreBackend};
