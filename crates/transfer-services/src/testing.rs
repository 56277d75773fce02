//! Wiring for service tests: every collaborator in memory, time under test control.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use transfer_core::models::{
    InProgressSubmission, Job, JobStatus, JobType, SessionStatus, StorageTier, UploadSession,
};
use transfer_core::{
    AcceptedFormats, Clock, LifecycleSettings, ManualClock, PromotionSettings, StorageBackend,
    UploadPolicy,
};
use transfer_db::{DraftStore, JobStore, MemoryStore};
use transfer_storage::{MemoryStorage, Storage, StorageError, StorageResult};
use transfer_worker::{JobQueue, JobQueueConfig, JobRegistry};

use crate::lifecycle::LifecycleService;
use crate::notifications::{RecordingNotifier, SendNotificationHandler};
use crate::promotion::{PromoteSessionHandler, PromotionService};
use crate::sessions::SessionService;

/// Memory storage whose first `failures` copies fail, or whose copies never
/// finish at all when `hang` is set.
pub(crate) struct FlakyStorage {
    inner: MemoryStorage,
    failures: AtomicUsize,
    copies: AtomicUsize,
    hang: bool,
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn write(&self, tier: StorageTier, key: &str, data: Bytes) -> StorageResult<u64> {
        self.inner.write(tier, key, data).await
    }

    async fn read(&self, tier: StorageTier, key: &str) -> StorageResult<Bytes> {
        self.inner.read(tier, key).await
    }

    async fn delete(&self, tier: StorageTier, key: &str) -> StorageResult<()> {
        self.inner.delete(tier, key).await
    }

    async fn delete_prefix(&self, tier: StorageTier, prefix: &str) -> StorageResult<u64> {
        self.inner.delete_prefix(tier, prefix).await
    }

    async fn exists(&self, tier: StorageTier, key: &str) -> StorageResult<bool> {
        self.inner.exists(tier, key).await
    }

    async fn content_length(&self, tier: StorageTier, key: &str) -> StorageResult<u64> {
        self.inner.content_length(tier, key).await
    }

    async fn copy_between(
        &self,
        from: StorageTier,
        to: StorageTier,
        key: &str,
    ) -> StorageResult<u64> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::CopyFailed(format!("injected failure for {}", key)));
        }
        self.inner.copy_between(from, to, key).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

/// Job table whose inserts can be switched to fail.
pub(crate) struct SwitchableJobs {
    inner: MemoryStore,
    fail_inserts: AtomicBool,
}

#[async_trait]
impl JobStore for SwitchableJobs {
    async fn insert_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        scheduled_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Job> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            anyhow::bail!("job table unavailable");
        }
        self.inner
            .insert_job(job_type, payload, scheduled_at, max_attempts)
            .await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        self.inner.list_jobs(status).await
    }

    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        self.inner.claim_next_job(now).await
    }

    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        self.inner.mark_completed(id, result).await
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        self.inner.mark_failed(id, error).await
    }

    async fn reschedule(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()> {
        self.inner.reschedule(id, error, run_at).await
    }

    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64> {
        self.inner.requeue_stale(started_before).await
    }
}

/// Draft table whose per-session cleanup can be switched to fail.
pub(crate) struct SwitchableDrafts {
    inner: MemoryStore,
    fail_cleanup: AtomicBool,
}

#[async_trait]
impl DraftStore for SwitchableDrafts {
    async fn save_draft(&self, draft: &InProgressSubmission) -> Result<InProgressSubmission> {
        self.inner.save_draft(draft).await
    }

    async fn get_draft(&self, id: Uuid) -> Result<Option<InProgressSubmission>> {
        self.inner.get_draft(id).await
    }

    async fn find_draft_by_session(&self, token: &str) -> Result<Option<InProgressSubmission>> {
        self.inner.find_draft_by_session(token).await
    }

    async fn delete_draft(&self, id: Uuid) -> Result<bool> {
        self.inner.delete_draft(id).await
    }

    async fn delete_drafts_for_session(&self, token: &str) -> Result<u64> {
        if self.fail_cleanup.load(Ordering::SeqCst) {
            anyhow::bail!("draft table unavailable");
        }
        self.inner.delete_drafts_for_session(token).await
    }

    async fn find_reminder_candidates(
        &self,
        statuses: &[SessionStatus],
        touched_before: DateTime<Utc>,
    ) -> Result<Vec<(InProgressSubmission, UploadSession)>> {
        self.inner
            .find_reminder_candidates(statuses, touched_before)
            .await
    }

    async fn mark_reminder_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.inner.mark_reminder_sent(id, at).await
    }
}

pub(crate) struct Harness {
    pub store: MemoryStore,
    pub storage: MemoryStorage,
    pub clock: ManualClock,
    pub notifier: RecordingNotifier,
    pub queue: JobQueue,
    pub registry: JobRegistry,
    pub sessions: SessionService,
    pub promotion: Arc<PromotionService>,
    pub lifecycle: LifecycleService,
    flaky: Arc<FlakyStorage>,
    jobs: Arc<SwitchableJobs>,
    drafts: Arc<SwitchableDrafts>,
}

pub(crate) struct HarnessBuilder {
    policy: UploadPolicy,
    promotion: PromotionSettings,
    lifecycle: LifecycleSettings,
    job_queue: JobQueueConfig,
    failing_copies: usize,
    hanging_copies: bool,
}

impl HarnessBuilder {
    pub fn policy(mut self, f: impl FnOnce(&mut UploadPolicy)) -> Self {
        f(&mut self.policy);
        self
    }

    pub fn admins(mut self, emails: &[&str]) -> Self {
        self.promotion.admin_notification_emails = emails.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn failing_copies(mut self, failures: usize) -> Self {
        self.failing_copies = failures;
        self
    }

    pub fn hanging_copies(mut self) -> Self {
        self.hanging_copies = true;
        self
    }

    pub fn job_queue(mut self, f: impl FnOnce(&mut JobQueueConfig)) -> Self {
        f(&mut self.job_queue);
        self
    }

    pub fn retention_days(mut self, days: i64) -> Self {
        self.lifecycle.stored_retention_days = days;
        self
    }

    pub fn build(self) -> Harness {
        let store = MemoryStore::new();
        let memory = MemoryStorage::new();
        let clock = ManualClock::default();
        let notifier = RecordingNotifier::new();
        let flaky = Arc::new(FlakyStorage {
            inner: memory.clone(),
            failures: AtomicUsize::new(self.failing_copies),
            copies: AtomicUsize::new(0),
            hang: self.hanging_copies,
        });

        let storage: Arc<dyn Storage> = flaky.clone();
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let shared = Arc::new(store.clone());
        let jobs = Arc::new(SwitchableJobs {
            inner: store.clone(),
            fail_inserts: AtomicBool::new(false),
        });
        let queue = JobQueue::new(jobs.clone(), clock_dyn.clone(), self.job_queue);
        let drafts = Arc::new(SwitchableDrafts {
            inner: store.clone(),
            fail_cleanup: AtomicBool::new(false),
        });

        let sessions = SessionService::new(
            shared.clone(),
            drafts.clone(),
            storage.clone(),
            queue.clone(),
            clock_dyn.clone(),
            self.policy,
            self.lifecycle.clone(),
        );
        let promotion = Arc::new(PromotionService::new(
            shared.clone(),
            shared.clone(),
            storage.clone(),
            queue.clone(),
            clock_dyn.clone(),
            self.promotion,
        ));
        let lifecycle = LifecycleService::new(
            shared.clone(),
            drafts.clone(),
            shared.clone(),
            storage,
            queue.clone(),
            clock_dyn.clone(),
            self.lifecycle.clone(),
        );

        let mut registry = JobRegistry::new();
        registry
            .register(
                JobType::PromoteSession,
                Arc::new(PromoteSessionHandler::new(promotion.clone())),
            )
            .register(
                JobType::SendNotification,
                Arc::new(SendNotificationHandler::new(
                    Arc::new(notifier.clone()),
                    shared,
                    clock_dyn,
                    self.lifecycle.idle_timeout(),
                )),
            );

        Harness {
            store,
            storage: memory,
            clock,
            notifier,
            queue,
            registry,
            sessions,
            promotion,
            lifecycle,
            flaky,
            jobs,
            drafts,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            policy: UploadPolicy {
                max_single_upload_mb: 64,
                max_total_upload_mb: 256,
                max_total_upload_count: 40,
                accepted_formats: AcceptedFormats::new()
                    .with_group("Document", ["pdf", "docx", "txt"])
                    .with_group("Image", ["jpg", "jpeg", "png"]),
            },
            promotion: PromotionSettings::default(),
            lifecycle: LifecycleSettings::default(),
            job_queue: JobQueueConfig::default(),
            failing_copies: 0,
            hanging_copies: false,
        }
    }

    /// Run every job due at the current (manual) time.
    pub async fn run_jobs(&self) -> usize {
        self.queue
            .run_due(&self.registry)
            .await
            .expect("job bookkeeping failed")
    }

    /// Make removing a session's drafts fail (or succeed again).
    pub fn fail_draft_cleanup(&self, fail: bool) {
        self.drafts.fail_cleanup.store(fail, Ordering::SeqCst);
    }

    /// Make every following job insert fail (or succeed again).
    pub fn fail_job_inserts(&self, fail: bool) {
        self.jobs.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of temp-to-permanent copies attempted so far.
    pub fn copy_attempts(&self) -> usize {
        self.flaky.copies.load(Ordering::SeqCst)
    }
}
