//! In-process store
//!
//! [`MemoryStore`] implements every store trait over one mutex-guarded set of
//! maps. It backs `STORE_BACKEND=memory` and the service tests. Holding a
//! single lock per call gives the same all-or-nothing conditional updates the
//! Postgres repositories get from `UPDATE ... WHERE status = ANY(..)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use transfer_core::models::{
    FileRecord, InProgressSubmission, Job, JobStatus, JobType, SessionStatus, StorageTier,
    UploadSession, User,
};

use crate::store::{
    AddFileOutcome, DraftReference, DraftStore, FileLimits, JobStore, SessionStore, UserStore,
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, UploadSession>,
    files: HashMap<Uuid, FileRecord>,
    drafts: HashMap<Uuid, InProgressSubmission>,
    users: HashMap<Uuid, User>,
    jobs: HashMap<Uuid, Job>,
}

impl Tables {
    fn is_referenced(&self, token: &str) -> bool {
        self.drafts
            .values()
            .any(|d| d.session_token.as_deref() == Some(token))
    }
}

/// Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an account. There is no user-facing way to create one.
    pub fn insert_user(&self, user: User) {
        self.tables().users.insert(user.id, user);
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &UploadSession) -> Result<UploadSession> {
        let mut tables = self.tables();
        if tables.sessions.contains_key(&session.token) {
            anyhow::bail!("Upload session {} already exists", session.token);
        }
        tables
            .sessions
            .insert(session.token.clone(), session.clone());
        Ok(session.clone())
    }

    async fn get_session(&self, token: &str) -> Result<Option<UploadSession>> {
        Ok(self.tables().sessions.get(token).cloned())
    }

    async fn transition(
        &self,
        token: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        touched_at: Option<DateTime<Utc>>,
    ) -> Result<Option<UploadSession>> {
        let mut tables = self.tables();
        let Some(session) = tables.sessions.get_mut(token) else {
            return Ok(None);
        };
        if !from.contains(&session.status) {
            return Ok(None);
        }
        session.status = to;
        if let Some(at) = touched_at {
            session.last_interaction_at = session.last_interaction_at.max(at);
        }
        Ok(Some(session.clone()))
    }

    async fn transition_if_idle(
        &self,
        token: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        idle_before: DateTime<Utc>,
    ) -> Result<Option<UploadSession>> {
        let mut tables = self.tables();
        let Some(session) = tables.sessions.get_mut(token) else {
            return Ok(None);
        };
        if !from.contains(&session.status) || session.last_interaction_at >= idle_before {
            return Ok(None);
        }
        session.status = to;
        Ok(Some(session.clone()))
    }

    async fn touch(&self, token: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(session) = self.tables().sessions.get_mut(token) {
            session.last_interaction_at = session.last_interaction_at.max(at);
        }
        Ok(())
    }

    async fn delete_session(&self, token: &str) -> Result<bool> {
        let mut tables = self.tables();
        let removed = tables.sessions.remove(token).is_some();
        if removed {
            tables.files.retain(|_, f| f.session_token != token);
            for draft in tables.drafts.values_mut() {
                if draft.session_token.as_deref() == Some(token) {
                    draft.session_token = None;
                }
            }
        }
        Ok(removed)
    }

    async fn find_idle_sessions(
        &self,
        statuses: &[SessionStatus],
        idle_before: DateTime<Utc>,
        reference: DraftReference,
    ) -> Result<Vec<UploadSession>> {
        let tables = self.tables();
        let mut sessions: Vec<UploadSession> = tables
            .sessions
            .values()
            .filter(|s| statuses.contains(&s.status) && s.last_interaction_at < idle_before)
            .filter(|s| match reference {
                DraftReference::Referenced => tables.is_referenced(&s.token),
                DraftReference::Unreferenced => !tables.is_referenced(&s.token),
                DraftReference::Any => true,
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.last_interaction_at);
        Ok(sessions)
    }

    async fn find_sessions_by_status(
        &self,
        statuses: &[SessionStatus],
    ) -> Result<Vec<UploadSession>> {
        let mut sessions: Vec<UploadSession> = self
            .tables()
            .sessions
            .values()
            .filter(|s| statuses.contains(&s.status))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn list_files(&self, token: &str) -> Result<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> = self
            .tables()
            .files
            .values()
            .filter(|f| f.session_token == token)
            .cloned()
            .collect();
        files.sort_by(|a, b| (a.created_at, &a.name).cmp(&(b.created_at, &b.name)));
        Ok(files)
    }

    async fn add_file(&self, file: &FileRecord, limits: &FileLimits) -> Result<AddFileOutcome> {
        let mut tables = self.tables();
        let accepting = tables
            .sessions
            .get(&file.session_token)
            .is_some_and(|s| s.status.accepts_uploads());
        if !accepting {
            return Ok(AddFileOutcome::SessionClosed);
        }

        let siblings: Vec<&FileRecord> = tables
            .files
            .values()
            .filter(|f| f.session_token == file.session_token)
            .collect();
        let temporary = siblings.iter().filter(|f| f.tier == StorageTier::Temporary);
        let count = temporary.clone().count() as u64;
        let bytes: u64 = temporary.map(|f| f.size_bytes.max(0) as u64).sum();

        if count >= limits.max_files {
            return Ok(AddFileOutcome::TooManyFiles);
        }
        if bytes.saturating_add(file.size_bytes.max(0) as u64) > limits.max_total_bytes {
            return Ok(AddFileOutcome::TotalSizeExceeded);
        }
        if siblings.iter().any(|f| f.name == file.name) {
            return Ok(AddFileOutcome::DuplicateName);
        }
        tables.files.insert(file.id, file.clone());
        Ok(AddFileOutcome::Added(file.clone()))
    }

    async fn remove_file(&self, token: &str, name: &str) -> Result<Option<FileRecord>> {
        let mut tables = self.tables();
        let id = tables
            .files
            .values()
            .find(|f| f.session_token == token && f.name == name)
            .map(|f| f.id);
        Ok(id.and_then(|id| tables.files.remove(&id)))
    }

    async fn mark_file_permanent(&self, file_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        match self.tables().files.get_mut(&file_id) {
            Some(file) if file.tier == StorageTier::Temporary => {
                file.tier = StorageTier::Permanent;
                file.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_temporary_files(&self, token: &str) -> Result<u64> {
        let mut tables = self.tables();
        let before = tables.files.len();
        tables
            .files
            .retain(|_, f| !(f.session_token == token && f.tier == StorageTier::Temporary));
        Ok((before - tables.files.len()) as u64)
    }
}

#[async_trait]
impl DraftStore for MemoryStore {
    async fn save_draft(&self, draft: &InProgressSubmission) -> Result<InProgressSubmission> {
        let mut tables = self.tables();
        if let Some(token) = draft.session_token.as_deref() {
            if !tables.sessions.contains_key(token) {
                anyhow::bail!("Upload session {} does not exist", token);
            }
            let taken = tables
                .drafts
                .values()
                .any(|d| d.id != draft.id && d.session_token.as_deref() == Some(token));
            if taken {
                anyhow::bail!("Upload session {} is already referenced by another draft", token);
            }
        }
        let mut saved = draft.clone();
        saved.reminder_sent_at = None;
        tables.drafts.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn get_draft(&self, id: Uuid) -> Result<Option<InProgressSubmission>> {
        Ok(self.tables().drafts.get(&id).cloned())
    }

    async fn find_draft_by_session(&self, token: &str) -> Result<Option<InProgressSubmission>> {
        Ok(self
            .tables()
            .drafts
            .values()
            .find(|d| d.session_token.as_deref() == Some(token))
            .cloned())
    }

    async fn delete_draft(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables().drafts.remove(&id).is_some())
    }

    async fn delete_drafts_for_session(&self, token: &str) -> Result<u64> {
        let mut tables = self.tables();
        let before = tables.drafts.len();
        tables
            .drafts
            .retain(|_, d| d.session_token.as_deref() != Some(token));
        Ok((before - tables.drafts.len()) as u64)
    }

    async fn find_reminder_candidates(
        &self,
        statuses: &[SessionStatus],
        touched_before: DateTime<Utc>,
    ) -> Result<Vec<(InProgressSubmission, UploadSession)>> {
        let tables = self.tables();
        let mut candidates: Vec<(InProgressSubmission, UploadSession)> = tables
            .drafts
            .values()
            .filter(|d| d.reminder_sent_at.is_none())
            .filter_map(|d| {
                let session = tables.sessions.get(d.session_token.as_deref()?)?;
                let due = statuses.contains(&session.status)
                    && session.last_interaction_at <= touched_before;
                due.then(|| (d.clone(), session.clone()))
            })
            .collect();
        candidates.sort_by_key(|(_, s)| s.last_interaction_at);
        Ok(candidates)
    }

    async fn mark_reminder_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        match self.tables().drafts.get_mut(&id) {
            Some(draft) if draft.reminder_sent_at.is_none() => {
                draft.reminder_sent_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables().users.get(&id).cloned())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        scheduled_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Pending,
            payload,
            result: None,
            last_error: None,
            scheduled_at,
            started_at: None,
            completed_at: None,
            attempts: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
        };
        self.tables().jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.tables().jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .tables()
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut tables = self.tables();
        let next = tables
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.scheduled_at <= now)
            .min_by_key(|j| (j.scheduled_at, j.created_at))
            .map(|j| j.id);
        let Some(job) = next.and_then(|id| tables.jobs.get_mut(&id)) else {
            return Ok(None);
        };
        job.status = JobStatus::Running;
        job.attempts += 1;
        job.started_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        if let Some(job) = self.tables().jobs.get_mut(&id) {
            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.completed_at = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        if let Some(job) = self.tables().jobs.get_mut(&id) {
            let now = Utc::now();
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
            job.completed_at = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()> {
        if let Some(job) = self.tables().jobs.get_mut(&id) {
            job.status = JobStatus::Pending;
            job.last_error = Some(error.to_string());
            job.scheduled_at = run_at;
            job.started_at = None;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let mut count = 0;
        for job in self.tables().jobs.values_mut() {
            let stale = job.status == JobStatus::Running
                && job.started_at.is_some_and(|at| at < started_before);
            if stale {
                job.status = JobStatus::Pending;
                job.started_at = None;
                count += 1;
            }
        }
        Ok(count)
    }
}
