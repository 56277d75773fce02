//! Transfer Worker
//!
//! Durable background jobs: typed [`JobKind`](transfer_core::models::JobKind)s
//! are written to a [`JobStore`](transfer_db::JobStore) by [`JobQueue`] and
//! executed by a bounded worker pool that looks handlers up in a
//! [`JobRegistry`].

pub mod registry;
pub mod queue;

pub use queue::{JobQueue, JobQueueConfig, WorkerHandle, MAX_RETRY_BACKOFF_SECS};
pub use registry::{JobHandler, JobRegistry};
