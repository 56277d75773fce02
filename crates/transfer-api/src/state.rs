//! Application state shared by every handler.

use std::sync::Arc;

use sqlx::PgPool;
use transfer_core::Config;
use transfer_services::{LifecycleService, SessionService};
use transfer_storage::Storage;
use transfer_worker::{JobQueue, JobRegistry};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: SessionService,
    pub lifecycle: Arc<LifecycleService>,
    pub queue: JobQueue,
    /// Handlers the worker pool dispatches to. Also drained directly in tests.
    pub registry: JobRegistry,
    pub storage: Arc<dyn Storage>,
    /// Present when the Postgres store backend is in use.
    pub pool: Option<PgPool>,
}
