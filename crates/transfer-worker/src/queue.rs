//! Job queue: submission, worker pool, retry and stale-job recovery.
//!
//! Jobs are durable rows in the [`JobStore`]. The pool claims due jobs on a
//! poll interval (and immediately when something is enqueued in-process),
//! runs each under a timeout and either completes it, schedules a retry with
//! exponential backoff, or fails it for good.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use transfer_core::models::{Job, JobKind};
use transfer_core::{Clock, JobError, JobQueueSettings};
use transfer_db::JobStore;

use crate::registry::JobRegistry;

/// Maximum delay in seconds before retrying a failed job.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Backoff in seconds after the `attempts`-th failed attempt (exponential with cap).
#[inline]
pub(crate) fn compute_retry_backoff_seconds(attempts: i32) -> u64 {
    2_u64
        .saturating_pow(attempts.max(0) as u32)
        .min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Clone, Debug)]
pub struct JobQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub timeout_seconds: u64,
    pub max_attempts: i32,
    /// Interval in seconds between runs of the stale job reaper. Zero disables it.
    pub stale_job_reap_interval_secs: u64,
    /// Added to the job timeout before a running job counts as stale.
    pub stale_job_grace_period_secs: u64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        JobQueueConfig::from(&JobQueueSettings::default())
    }
}

impl From<&JobQueueSettings> for JobQueueConfig {
    fn from(settings: &JobQueueSettings) -> Self {
        Self {
            max_workers: settings.max_workers.max(1),
            poll_interval_ms: settings.poll_interval_ms,
            timeout_seconds: settings.timeout_seconds,
            max_attempts: settings.max_attempts.max(1),
            stale_job_reap_interval_secs: 60,
            stale_job_grace_period_secs: 300,
        }
    }
}

impl JobQueueConfig {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Submits jobs and owns the worker pool.
///
/// Cloning is cheap; clones share the store and wake signal.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: JobQueueConfig,
    wake: Arc<Notify>,
}

/// Running worker pool. Dropping the handle leaves the pool running.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop claiming new jobs and wait for the pool loop to exit.
    ///
    /// Jobs already running keep going until they finish or time out.
    pub async fn shutdown(self) {
        tracing::info!("Initiating job queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Job worker pool task panicked");
        }
    }
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, config: JobQueueConfig) -> Self {
        Self {
            store,
            clock,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Submit a job that is due now.
    pub async fn enqueue(&self, kind: JobKind) -> Result<Uuid> {
        self.enqueue_at(self.clock.now(), kind).await
    }

    /// Submit a job that becomes due after `delay`. Negative delays run now.
    pub async fn enqueue_in(&self, delay: chrono::Duration, kind: JobKind) -> Result<Uuid> {
        let delay = delay.max(chrono::Duration::zero());
        self.enqueue_at(self.clock.now() + delay, kind).await
    }

    #[tracing::instrument(skip(self, kind), fields(job_type = %kind.job_type()))]
    pub async fn enqueue_at(&self, run_at: DateTime<Utc>, kind: JobKind) -> Result<Uuid> {
        let payload = kind
            .to_payload()
            .context("Failed to serialize job payload")?;
        let job = self
            .store
            .insert_job(kind.job_type(), payload, run_at, self.config.max_attempts)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, job_type = %kind.job_type(), "Failed to insert job");
                e
            })?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            scheduled_at = %job.scheduled_at,
            "Job submitted to queue"
        );

        self.wake.notify_one();
        Ok(job.id)
    }

    /// Spawn the worker pool and the stale job reaper.
    pub fn start(&self, registry: JobRegistry) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let queue = self.clone();
        let registry = Arc::new(registry);
        let join = tokio::spawn(async move {
            queue.worker_pool(registry, shutdown_rx).await;
        });
        WorkerHandle { shutdown_tx, join }
    }

    /// Run every job that is due right now, one at a time, on the calling task.
    ///
    /// Failed attempts are rescheduled into the future, so this returns once
    /// nothing is due. Returns how many attempts ran.
    pub async fn run_due(&self, registry: &JobRegistry) -> Result<usize> {
        let mut ran = 0;
        while let Some(job) = self.store.claim_next_job(self.clock.now()).await? {
            self.process_job(registry, job).await?;
            ran += 1;
        }
        Ok(ran)
    }

    async fn worker_pool(&self, registry: Arc<JobRegistry>, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            max_workers = self.config.max_workers,
            poll_interval_ms = self.config.poll_interval_ms,
            job_types = ?registry.job_types(),
            "Job queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if self.config.stale_job_reap_interval_secs > 0 {
            let queue = self.clone();
            let reap_interval = Duration::from_secs(self.config.stale_job_reap_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = queue.reap_stale_jobs().await {
                                tracing::error!(error = %e, "Stale job reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = self.wake.notified() => {
                    self.claim_and_dispatch_one(&registry, &semaphore).await;
                }
                _ = tokio::time::sleep(poll_interval) => {
                    self.claim_and_dispatch_one(&registry, &semaphore).await;
                }
            }
        }

        tracing::info!("Job queue worker pool stopped");
    }

    async fn claim_and_dispatch_one(&self, registry: &Arc<JobRegistry>, semaphore: &Arc<Semaphore>) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match self.store.claim_next_job(self.clock.now()).await {
            Ok(Some(job)) => {
                let queue = self.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = queue.process_job(&registry, job).await {
                        tracing::error!(error = %e, "Job bookkeeping failed");
                    }
                    // Another job may already be waiting behind this one.
                    queue.wake.notify_one();
                });
            }
            Ok(None) => {
                tracing::trace!("No jobs due");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim job from queue");
            }
        }
    }

    #[tracing::instrument(skip(self, registry, job), fields(job.id = %job.id, job.type = %job.job_type, job.attempt = job.attempts))]
    async fn process_job(&self, registry: &JobRegistry, job: Job) -> Result<()> {
        let result = tokio::time::timeout(self.config.timeout(), registry.dispatch(&job)).await;

        match result {
            Ok(Ok(output)) => {
                self.store
                    .mark_completed(job.id, output)
                    .await
                    .context("Failed to mark job as completed")?;
                tracing::info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
                Ok(())
            }
            Ok(Err(e)) => {
                let is_unrecoverable = e
                    .downcast_ref::<JobError>()
                    .map(|je| !je.is_recoverable())
                    .unwrap_or(false);

                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    unrecoverable = is_unrecoverable,
                    "Job attempt failed"
                );

                self.retry_or_fail(registry, &job, &e.to_string(), !is_unrecoverable)
                    .await
            }
            Err(_) => {
                tracing::error!(
                    job_id = %job.id,
                    timeout_seconds = self.config.timeout_seconds,
                    "Job execution timed out"
                );
                self.retry_or_fail(registry, &job, "Job execution timed out", true)
                    .await
            }
        }
    }

    async fn retry_or_fail(
        &self,
        registry: &JobRegistry,
        job: &Job,
        error: &str,
        retryable: bool,
    ) -> Result<()> {
        if retryable && job.can_retry() {
            let backoff_seconds = compute_retry_backoff_seconds(job.attempts);
            let run_at = self.clock.now() + chrono::Duration::seconds(backoff_seconds as i64);
            tracing::info!(
                job_id = %job.id,
                attempts = job.attempts,
                backoff_seconds = backoff_seconds,
                "Scheduling job retry"
            );
            self.store
                .reschedule(job.id, error, run_at)
                .await
                .context("Failed to reschedule job")
        } else {
            self.store
                .mark_failed(job.id, error)
                .await
                .context("Failed to mark job as failed")?;
            tracing::warn!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, "Job failed permanently");
            registry.notify_failed(job, error).await;
            Ok(())
        }
    }

    async fn reap_stale_jobs(&self) -> Result<u64> {
        let horizon = self.config.timeout_seconds + self.config.stale_job_grace_period_secs;
        let cutoff = self.clock.now() - chrono::Duration::seconds(horizon as i64);
        let requeued = self.store.requeue_stale(cutoff).await?;
        if requeued > 0 {
            tracing::warn!(count = requeued, "Requeued stale running jobs");
            self.wake.notify_one();
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobHandler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use transfer_core::models::{JobStatus, JobType, NotificationTemplate};
    use transfer_core::{ManualClock, SystemClock};
    use transfer_db::MemoryStore;

    struct CountingHandler {
        calls: AtomicUsize,
        gave_up: AtomicUsize,
        fail_first: usize,
        unrecoverable: bool,
    }

    impl CountingHandler {
        fn new(fail_first: usize, unrecoverable: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gave_up: AtomicUsize::new(0),
                fail_first,
                unrecoverable,
            })
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &Job) -> Result<serde_json::Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                let err = anyhow::anyhow!("attempt {} failed", call + 1);
                return Err(if self.unrecoverable {
                    JobError::unrecoverable(err).into()
                } else {
                    err
                });
            }
            Ok(serde_json::json!({ "calls": call + 1 }))
        }

        async fn on_failed(&self, _job: &Job, _error: &str) -> Result<()> {
            self.gave_up.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StuckHandler {
        gave_up: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl JobHandler for StuckHandler {
        async fn handle(&self, _job: &Job) -> Result<serde_json::Value> {
            std::future::pending::<()>().await;
            Ok(serde_json::Value::Null)
        }

        async fn on_failed(&self, _job: &Job, error: &str) -> Result<()> {
            self.gave_up.lock().unwrap().push(error.to_string());
            Ok(())
        }
    }

    fn setup(clock: Arc<dyn Clock>) -> (MemoryStore, JobQueue) {
        let store = MemoryStore::new();
        let config = JobQueueConfig {
            poll_interval_ms: 10,
            max_attempts: 3,
            ..JobQueueConfig::default()
        };
        let queue = JobQueue::new(Arc::new(store.clone()), clock, config);
        (store, queue)
    }

    fn registry_with(handler: Arc<CountingHandler>) -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register(JobType::PromoteSession, handler);
        registry
    }

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(compute_retry_backoff_seconds(0), 1);
        assert_eq!(compute_retry_backoff_seconds(1), 2);
        assert_eq!(compute_retry_backoff_seconds(2), 4);
        assert_eq!(compute_retry_backoff_seconds(8), 256);
        assert_eq!(compute_retry_backoff_seconds(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(64), MAX_RETRY_BACKOFF_SECS);
    }

    #[tokio::test]
    async fn successful_job_is_completed() {
        let clock = Arc::new(ManualClock::default());
        let (store, queue) = setup(clock);
        let handler = CountingHandler::new(0, false);
        let registry = registry_with(handler.clone());

        let id = queue.enqueue(JobKind::promote("abc")).await.unwrap();
        assert_eq!(queue.run_due(&registry).await.unwrap(), 1);

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(serde_json::json!({"calls": 1})));
    }

    #[tokio::test]
    async fn recoverable_failure_is_retried_with_backoff_until_attempts_run_out() {
        let clock = Arc::new(ManualClock::default());
        let (store, queue) = setup(clock.clone());
        let handler = CountingHandler::new(usize::MAX, false);
        let registry = registry_with(handler.clone());

        let id = queue.enqueue(JobKind::promote("abc")).await.unwrap();
        assert_eq!(queue.run_due(&registry).await.unwrap(), 1);

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.scheduled_at, clock.now() + chrono::Duration::seconds(2));

        // Nothing runs until the backoff has elapsed.
        assert_eq!(queue.run_due(&registry).await.unwrap(), 0);
        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(queue.run_due(&registry).await.unwrap(), 1);
        clock.advance(chrono::Duration::seconds(4));
        assert_eq!(queue.run_due(&registry).await.unwrap(), 1);

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.gave_up.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unrecoverable_failure_fails_immediately() {
        let clock = Arc::new(ManualClock::default());
        let (store, queue) = setup(clock);
        let handler = CountingHandler::new(1, true);
        let registry = registry_with(handler.clone());

        let id = queue.enqueue(JobKind::promote("abc")).await.unwrap();
        queue.run_due(&registry).await.unwrap();

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("attempt 1 failed"));
        assert_eq!(handler.gave_up.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retried_job_does_not_trigger_failure_hook() {
        let clock = Arc::new(ManualClock::default());
        let (_store, queue) = setup(clock);
        let handler = CountingHandler::new(1, false);
        let registry = registry_with(handler.clone());

        queue.enqueue(JobKind::promote("abc")).await.unwrap();
        queue.run_due(&registry).await.unwrap();
        assert_eq!(handler.gave_up.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_last_attempt_triggers_failure_hook() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::new();
        let config = JobQueueConfig {
            timeout_seconds: 5,
            max_attempts: 1,
            ..JobQueueConfig::default()
        };
        let queue = JobQueue::new(Arc::new(store.clone()), clock, config);
        let gave_up = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = JobRegistry::new();
        registry.register(
            JobType::PromoteSession,
            Arc::new(StuckHandler {
                gave_up: gave_up.clone(),
            }),
        );

        let id = queue.enqueue(JobKind::promote("abc")).await.unwrap();
        queue.run_due(&registry).await.unwrap();

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            *gave_up.lock().unwrap(),
            vec!["Job execution timed out".to_string()]
        );
    }

    #[tokio::test]
    async fn delayed_job_waits_for_its_time() {
        let clock = Arc::new(ManualClock::default());
        let (store, queue) = setup(clock.clone());
        let mut registry = JobRegistry::new();
        registry.register(JobType::SendNotification, CountingHandler::new(0, false));

        let id = queue
            .enqueue_in(
                chrono::Duration::minutes(30),
                JobKind::notify(
                    NotificationTemplate::SessionExpiring,
                    vec!["user@example.org".to_string()],
                    serde_json::Value::Null,
                ),
            )
            .await
            .unwrap();

        assert_eq!(queue.run_due(&registry).await.unwrap(), 0);
        clock.advance(chrono::Duration::minutes(30));
        assert_eq!(queue.run_due(&registry).await.unwrap(), 1);
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn negative_delay_runs_now() {
        let clock = Arc::new(ManualClock::default());
        let (store, queue) = setup(clock.clone());
        let id = queue
            .enqueue_in(chrono::Duration::minutes(-5), JobKind::promote("abc"))
            .await
            .unwrap();
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.scheduled_at, clock.now());
    }

    #[tokio::test]
    async fn worker_pool_processes_enqueued_jobs() {
        let (store, queue) = setup(Arc::new(SystemClock));
        let handler = CountingHandler::new(0, false);
        let worker = queue.start(registry_with(handler.clone()));

        let id = queue.enqueue(JobKind::promote("abc")).await.unwrap();

        let mut status = JobStatus::Pending;
        for _ in 0..200 {
            status = store.get_job(id).await.unwrap().unwrap().status;
            if status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.shutdown().await;

        assert_eq!(status, JobStatus::Completed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_job_error_treated_as_recoverable() {
        let err: anyhow::Error = anyhow::anyhow!("generic error");
        let is_unrecoverable = err
            .downcast_ref::<JobError>()
            .map(|je| !je.is_recoverable())
            .unwrap_or(false);
        assert!(!is_unrecoverable);
    }
}
