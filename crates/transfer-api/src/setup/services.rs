//! Store, storage, queue and service wiring

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use transfer_core::models::JobType;
use transfer_core::{Clock, Config, StoreBackend};
use transfer_db::{
    DraftRepository, DraftStore, JobRepository, JobStore, MemoryStore, SessionRepository,
    SessionStore, UserRepository, UserStore,
};
use transfer_services::{
    LifecycleService, LogNotifier, NotificationSender, PromoteSessionHandler, PromotionService,
    Scheduler, SchedulerHandle, SendNotificationHandler, SessionService, SmtpNotifier,
};
use transfer_storage::create_storage;
use transfer_worker::{JobQueue, JobQueueConfig, JobRegistry, WorkerHandle};

use super::database;
use crate::state::AppState;

struct Stores {
    sessions: Arc<dyn SessionStore>,
    drafts: Arc<dyn DraftStore>,
    users: Arc<dyn UserStore>,
    jobs: Arc<dyn JobStore>,
    pool: Option<PgPool>,
}

async fn setup_stores(config: &Config) -> Result<Stores> {
    match config.store_backend() {
        StoreBackend::Postgres => {
            let pool = database::setup_database(config).await?;
            Ok(Stores {
                sessions: Arc::new(SessionRepository::new(pool.clone())),
                drafts: Arc::new(DraftRepository::new(pool.clone())),
                users: Arc::new(UserRepository::new(pool.clone())),
                jobs: Arc::new(JobRepository::new(pool.clone())),
                pool: Some(pool),
            })
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; sessions do not survive a restart");
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                sessions: store.clone(),
                drafts: store.clone(),
                users: store.clone(),
                jobs: store,
                pool: None,
            })
        }
    }
}

fn setup_notifier(config: &Config) -> Result<Arc<dyn NotificationSender>> {
    match config.smtp() {
        Some(smtp) => {
            let notifier =
                SmtpNotifier::from_settings(smtp).context("Failed to configure SMTP notifier")?;
            tracing::info!(host = %smtp.host, port = smtp.port, "SMTP notifications enabled");
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::info!("SMTP_HOST not set, notifications are logged only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Build every service. Workers and sweeps are not started here.
pub async fn initialize_services(config: &Config, clock: Arc<dyn Clock>) -> Result<Arc<AppState>> {
    let stores = setup_stores(config).await?;
    let storage = create_storage(config)
        .await
        .context("Failed to initialize storage")?;
    tracing::info!(backend = %storage.backend_type(), "Storage initialized");

    let queue = JobQueue::new(
        stores.jobs.clone(),
        clock.clone(),
        JobQueueConfig::from(config.job_queue()),
    );

    let sessions = SessionService::new(
        stores.sessions.clone(),
        stores.drafts.clone(),
        storage.clone(),
        queue.clone(),
        clock.clone(),
        config.upload_policy().clone(),
        config.lifecycle().clone(),
    );

    let promotion = Arc::new(PromotionService::new(
        stores.sessions.clone(),
        stores.users.clone(),
        storage.clone(),
        queue.clone(),
        clock.clone(),
        config.promotion().clone(),
    ));

    let lifecycle = Arc::new(LifecycleService::new(
        stores.sessions.clone(),
        stores.drafts.clone(),
        stores.users.clone(),
        storage.clone(),
        queue.clone(),
        clock.clone(),
        config.lifecycle().clone(),
    ));

    let notifier = setup_notifier(config)?;
    let mut registry = JobRegistry::new();
    registry
        .register(
            JobType::PromoteSession,
            Arc::new(PromoteSessionHandler::new(promotion)),
        )
        .register(
            JobType::SendNotification,
            Arc::new(SendNotificationHandler::new(
                notifier,
                stores.sessions.clone(),
                clock,
                config.lifecycle().idle_timeout(),
            )),
        );
    tracing::info!(job_types = ?registry.job_types(), "Job handlers registered");

    Ok(Arc::new(AppState {
        config: config.clone(),
        sessions,
        lifecycle,
        queue,
        registry,
        storage,
        pool: stores.pool,
    }))
}

/// Worker pool and lifecycle scheduler, owned by `main`.
pub struct BackgroundTasks {
    worker: WorkerHandle,
    scheduler: SchedulerHandle,
}

impl BackgroundTasks {
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        self.worker.shutdown().await;
    }
}

pub fn start_background(state: &AppState) -> BackgroundTasks {
    let worker = state.queue.start(state.registry.clone());

    let mut scheduler = Scheduler::new();
    scheduler.register(
        "session_lifecycle",
        state.config.lifecycle().sweep_interval(),
        state.lifecycle.clone(),
    );

    BackgroundTasks {
        worker,
        scheduler: scheduler.start(),
    }
}
