//! Store traits
//!
//! The lifecycle services talk to persistence only through these traits. The
//! Postgres repositories in [`crate::db`] implement them for production, and
//! [`crate::memory::MemoryStore`] implements all of them in process.
//!
//! Every status change is a conditional update: it names the statuses the
//! session must currently be in and reports whether it won.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use transfer_core::models::{
    FileRecord, InProgressSubmission, Job, JobStatus, JobType, SessionStatus, UploadSession, User,
};
use uuid::Uuid;

/// Result of trying to record a newly uploaded file.
#[derive(Debug, Clone)]
pub enum AddFileOutcome {
    Added(FileRecord),
    /// A file with that name is already in the session.
    DuplicateName,
    /// The session no longer accepts uploads (or does not exist).
    SessionClosed,
    /// The session already holds `FileLimits::max_files` temporary files.
    TooManyFiles,
    /// The file would take the session's temporary bytes past `FileLimits::max_total_bytes`.
    TotalSizeExceeded,
}

/// Session-wide caps re-checked while the session row is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLimits {
    pub max_files: u64,
    pub max_total_bytes: u64,
}

/// Which sessions an idle sweep is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftReference {
    /// Only sessions some draft still points at.
    Referenced,
    /// Only sessions no draft points at.
    Unreferenced,
    Any,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &UploadSession) -> Result<UploadSession>;

    async fn get_session(&self, token: &str) -> Result<Option<UploadSession>>;

    /// Move a session to `to` if it is currently in one of `from`.
    ///
    /// `touched_at`, when given, bumps `last_interaction_at` (never backwards).
    /// Returns `None` when the session is missing or in another status.
    async fn transition(
        &self,
        token: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        touched_at: Option<DateTime<Utc>>,
    ) -> Result<Option<UploadSession>>;

    /// Like [`SessionStore::transition`], but also requires the session to have
    /// been idle since before `idle_before`. Used by the reaper so a session a
    /// user just touched is left alone.
    async fn transition_if_idle(
        &self,
        token: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        idle_before: DateTime<Utc>,
    ) -> Result<Option<UploadSession>>;

    /// Bump `last_interaction_at` (never backwards).
    async fn touch(&self, token: &str, at: DateTime<Utc>) -> Result<()>;

    /// Hard-delete a session; its file records go with it.
    async fn delete_session(&self, token: &str) -> Result<bool>;

    /// Sessions in `statuses` idle since before `idle_before`, filtered by draft reference.
    async fn find_idle_sessions(
        &self,
        statuses: &[SessionStatus],
        idle_before: DateTime<Utc>,
        reference: DraftReference,
    ) -> Result<Vec<UploadSession>>;

    async fn find_sessions_by_status(&self, statuses: &[SessionStatus])
        -> Result<Vec<UploadSession>>;

    async fn list_files(&self, token: &str) -> Result<Vec<FileRecord>>;

    /// Record a file, but only while the session accepts uploads, the name is
    /// free and the session stays within `limits`. All of it is decided
    /// atomically with the insert.
    async fn add_file(&self, file: &FileRecord, limits: &FileLimits) -> Result<AddFileOutcome>;

    async fn remove_file(&self, token: &str, name: &str) -> Result<Option<FileRecord>>;

    /// Flip one TEMPORARY file to PERMANENT. Returns false if it already was.
    async fn mark_file_permanent(&self, file_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Delete a session's TEMPORARY file records. Returns how many went.
    async fn delete_temporary_files(&self, token: &str) -> Result<u64>;
}

#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Insert or update a draft. Saving restarts its reminder window.
    async fn save_draft(&self, draft: &InProgressSubmission) -> Result<InProgressSubmission>;

    async fn get_draft(&self, id: Uuid) -> Result<Option<InProgressSubmission>>;

    async fn find_draft_by_session(&self, token: &str) -> Result<Option<InProgressSubmission>>;

    async fn delete_draft(&self, id: Uuid) -> Result<bool>;

    async fn delete_drafts_for_session(&self, token: &str) -> Result<u64>;

    /// Drafts with no reminder sent whose session is in `statuses` and was last
    /// touched at or before `touched_before`.
    async fn find_reminder_candidates(
        &self,
        statuses: &[SessionStatus],
        touched_before: DateTime<Utc>,
    ) -> Result<Vec<(InProgressSubmission, UploadSession)>>;

    /// Record that a reminder went out. Returns false if one already had.
    async fn mark_reminder_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        scheduled_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Job>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>>;

    /// Claim the oldest due pending job, mark it running and count the attempt.
    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<Job>>;

    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> Result<()>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()>;

    /// Put a failed attempt back in the queue to run at `run_at`.
    async fn reschedule(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()>;

    /// Return jobs stuck in running since before `started_before` to pending.
    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64>;
}

pub(crate) fn status_strings(statuses: &[SessionStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}
