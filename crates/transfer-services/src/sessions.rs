//! Upload session operations
//!
//! Every status change goes through a conditional store update naming the
//! statuses the session must be in, so two requests racing on the same session
//! cannot both win.

use bytes::Bytes;
use std::sync::Arc;
use uuid::Uuid;

use transfer_core::models::{
    is_well_formed_token, FileRecord, FileResponse, InProgressSubmission, JobKind,
    SaveDraftRequest, SessionResponse, SessionStatus, SessionUsage, StorageTier, UploadSession,
};
use transfer_core::{AppError, Clock, LifecycleSettings, Rejection, UploadPolicy};
use transfer_db::{AddFileOutcome, DraftStore, FileLimits, SessionStore};
use transfer_storage::{session_file_key, Storage};
use transfer_worker::JobQueue;

const OPEN: &[SessionStatus] = &[SessionStatus::Created, SessionStatus::Uploading];

#[derive(Clone)]
pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
    drafts: Arc<dyn DraftStore>,
    storage: Arc<dyn Storage>,
    queue: JobQueue,
    clock: Arc<dyn Clock>,
    policy: UploadPolicy,
    lifecycle: LifecycleSettings,
}

impl SessionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        drafts: Arc<dyn DraftStore>,
        storage: Arc<dyn Storage>,
        queue: JobQueue,
        clock: Arc<dyn Clock>,
        policy: UploadPolicy,
        lifecycle: LifecycleSettings,
    ) -> Self {
        Self {
            sessions,
            drafts,
            storage,
            queue,
            clock,
            policy,
            lifecycle,
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_session(&self, user_id: Option<Uuid>) -> Result<SessionResponse, AppError> {
        let session = UploadSession::new(user_id, self.clock.now());
        let session = self.sessions.create_session(&session).await?;
        tracing::info!(session_token = %session.token, "Upload session created");
        Ok(self.view(&session, &[]))
    }

    pub async fn get_session(&self, token: &str) -> Result<SessionResponse, AppError> {
        let session = self.load(token).await?;
        let files = self.sessions.list_files(token).await?;
        Ok(self.view(&session, &files))
    }

    /// Admit a file into a session and write it to the temporary tier.
    ///
    /// The record is inserted before the bytes are written so the name is
    /// claimed exactly once; a failed write removes the record again.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn add_file(
        &self,
        token: &str,
        filename: &str,
        data: Bytes,
    ) -> Result<FileResponse, AppError> {
        let session = self.load(token).await?;
        ensure_status(&session, OPEN, "upload files to")?;

        let files = self.sessions.list_files(token).await?;
        let usage = SessionUsage::from_files(&files);
        let size = self
            .policy
            .check_file(filename, &data.len().to_string(), Some(&usage))
            .map_err(|rejection| {
                tracing::debug!(
                    session_token = %token,
                    code = %rejection.code,
                    error = %rejection.verbose_error,
                    "File rejected"
                );
                rejection
            })?;

        let key = session_file_key(token, filename)?;
        let now = self.clock.now();
        let record = FileRecord::new(token, filename, size as i64, now);
        let limits = FileLimits {
            max_files: self.policy.max_total_upload_count,
            max_total_bytes: self.policy.max_session_bytes(),
        };
        let record = match self.sessions.add_file(&record, &limits).await? {
            AddFileOutcome::Added(record) => record,
            AddFileOutcome::TooManyFiles => {
                return Err(self.policy.too_many_files(filename).into());
            }
            AddFileOutcome::TotalSizeExceeded => {
                return Err(self.policy.total_size_exceeded(filename).into());
            }
            AddFileOutcome::DuplicateName => {
                return Err(Rejection::duplicate_name(filename).into());
            }
            AddFileOutcome::SessionClosed => {
                let session = self.load(token).await?;
                return Err(status_error(&session, "upload files to"));
            }
        };

        if let Err(e) = self.storage.write(StorageTier::Temporary, &key, data).await {
            tracing::error!(error = %e, session_token = %token, file = %filename, "Failed to write upload");
            self.sessions.remove_file(token, filename).await?;
            return Err(e.into());
        }

        if self
            .sessions
            .transition(token, OPEN, SessionStatus::Uploading, Some(now))
            .await?
            .is_none()
        {
            // Closed while the bytes were being written.
            self.sessions.remove_file(token, filename).await?;
            self.delete_temp_bytes(&key).await;
            let session = self.load(token).await?;
            return Err(status_error(&session, "upload files to"));
        }

        tracing::info!(session_token = %token, file = %filename, size, "File added to session");
        Ok(FileResponse::from(&record))
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_file(&self, token: &str, filename: &str) -> Result<SessionResponse, AppError> {
        let session = self.load(token).await?;
        ensure_status(&session, &[SessionStatus::Uploading], "remove files from")?;

        let removed = self
            .sessions
            .remove_file(token, filename)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found in session", filename)))?;
        let key = session_file_key(token, &removed.name)?;
        self.delete_temp_bytes(&key).await;

        self.sessions
            .transition(token, &[SessionStatus::Uploading], SessionStatus::Uploading, Some(self.clock.now()))
            .await?;
        self.get_session(token).await
    }

    /// Close the session for uploads and hand it to the promotion worker.
    ///
    /// Returns as soon as the promotion job is queued. The draft that tracked
    /// the session is complete and goes away.
    #[tracing::instrument(skip(self))]
    pub async fn finalize(&self, token: &str) -> Result<SessionResponse, AppError> {
        let session = self.load(token).await?;
        match session.status {
            SessionStatus::Uploading => {}
            SessionStatus::Created => {
                return Err(AppError::BadRequest(
                    "No files have been uploaded to this session".to_string(),
                ))
            }
            _ => return Err(status_error(&session, "finalize")),
        }
        if self.sessions.list_files(token).await?.is_empty() {
            return Err(AppError::BadRequest(
                "No files have been uploaded to this session".to_string(),
            ));
        }

        let Some(session) = self
            .sessions
            .transition(
                token,
                &[SessionStatus::Uploading],
                SessionStatus::CopyInProgress,
                Some(self.clock.now()),
            )
            .await?
        else {
            let session = self.load(token).await?;
            return Err(status_error(&session, "finalize"));
        };

        self.enqueue_promotion(token, SessionStatus::Uploading).await?;
        match self.drafts.delete_drafts_for_session(token).await {
            Ok(completed) => {
                tracing::info!(session_token = %token, drafts_completed = completed, "Session finalized")
            }
            Err(e) => tracing::error!(
                error = %e,
                session_token = %token,
                "Session finalized but its draft could not be removed"
            ),
        }

        let files = self.sessions.list_files(token).await?;
        Ok(self.view(&session, &files))
    }

    /// Re-queue promotion for a session whose copy attempts were exhausted.
    #[tracing::instrument(skip(self))]
    pub async fn retry(&self, token: &str) -> Result<SessionResponse, AppError> {
        let session = self.load(token).await?;
        if session.status != SessionStatus::CopyFailed {
            return Err(status_error(&session, "retry"));
        }
        let Some(session) = self
            .sessions
            .transition(
                token,
                &[SessionStatus::CopyFailed],
                SessionStatus::CopyInProgress,
                Some(self.clock.now()),
            )
            .await?
        else {
            let session = self.load(token).await?;
            return Err(status_error(&session, "retry"));
        };

        self.enqueue_promotion(token, SessionStatus::CopyFailed).await?;
        tracing::info!(session_token = %token, "Promotion retry queued");

        let files = self.sessions.list_files(token).await?;
        Ok(self.view(&session, &files))
    }

    /// Reopen an expired session when its draft is picked up again.
    ///
    /// Expiry already dropped the temporary files, so the session starts over
    /// empty in CREATED. Resuming an open session only refreshes it.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, token: &str) -> Result<SessionResponse, AppError> {
        let session = self.load(token).await?;
        let target = match session.status {
            SessionStatus::Expired => SessionStatus::Created,
            SessionStatus::Created | SessionStatus::Uploading => session.status,
            _ => return Err(status_error(&session, "resume")),
        };
        let from = [session.status];

        let Some(session) = self
            .sessions
            .transition(token, &from, target, Some(self.clock.now()))
            .await?
        else {
            let session = self.load(token).await?;
            return Err(status_error(&session, "resume"));
        };

        tracing::info!(session_token = %token, status = %session.status, "Session resumed");
        let files = self.sessions.list_files(token).await?;
        Ok(self.view(&session, &files))
    }

    /// Run the admission policy without sending bytes.
    ///
    /// Without a session only the per-file checks apply.
    pub async fn check_file(
        &self,
        token: Option<&str>,
        filename: &str,
        declared_size: &serde_json::Value,
    ) -> Result<(), AppError> {
        let declared = match declared_size {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => String::new(),
        };

        let usage = match token {
            Some(token) => {
                let session = self.load(token).await?;
                ensure_status(&session, OPEN, "upload files to")?;
                let files = self.sessions.list_files(token).await?;
                Some(SessionUsage::from_files(&files))
            }
            None => None,
        };

        self.policy
            .check_file(filename, &declared, usage.as_ref())
            .map(|_| ())
            .map_err(AppError::from)
    }

    /// Create or update a draft. Saving counts as activity on its session.
    #[tracing::instrument(skip(self, request))]
    pub async fn save_draft(
        &self,
        request: SaveDraftRequest,
    ) -> Result<InProgressSubmission, AppError> {
        let now = self.clock.now();

        if let Some(token) = request.session_token.as_deref() {
            let session = self.load(token).await?;
            if session.status.is_gone() {
                return Err(status_error(&session, "attach a draft to"));
            }
            if let Some(other) = self.drafts.find_draft_by_session(token).await? {
                if Some(other.id) != request.id {
                    return Err(AppError::Conflict(
                        "Session is already tracked by another draft".to_string(),
                    ));
                }
            }
            self.sessions.touch(token, now).await?;
        }

        let draft = match request.id {
            Some(id) => {
                let mut draft = self
                    .drafts
                    .get_draft(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Draft {} not found", id)))?;
                draft.user_id = request.user_id.or(draft.user_id);
                draft.session_token = request.session_token;
                draft.title = request.title;
                draft.last_updated_at = now;
                draft
            }
            None => InProgressSubmission::new(
                request.user_id,
                request.session_token,
                request.title,
                now,
            ),
        };

        let saved = self.drafts.save_draft(&draft).await?;
        tracing::info!(draft_id = %saved.id, session_token = ?saved.session_token, "Draft saved");
        Ok(saved)
    }

    /// Drop a draft. Its session, if any, is left for the reaper.
    #[tracing::instrument(skip(self))]
    pub async fn abandon_draft(&self, id: Uuid) -> Result<(), AppError> {
        if !self.drafts.delete_draft(id).await? {
            return Err(AppError::NotFound(format!("Draft {} not found", id)));
        }
        tracing::info!(draft_id = %id, "Draft abandoned");
        Ok(())
    }

    /// Queue the promotion job for a session just moved to COPY_IN_PROGRESS.
    ///
    /// Without a job nothing would ever move the session on, so a failed
    /// enqueue puts it back to `restore`.
    async fn enqueue_promotion(&self, token: &str, restore: SessionStatus) -> Result<(), AppError> {
        let Err(e) = self.queue.enqueue(JobKind::promote(token)).await else {
            return Ok(());
        };
        tracing::error!(error = %e, session_token = %token, "Failed to queue promotion");
        match self
            .sessions
            .transition(token, &[SessionStatus::CopyInProgress], restore, None)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                session_token = %token,
                "Session left COPY_IN_PROGRESS before it could be restored"
            ),
            Err(restore_err) => tracing::error!(
                error = %restore_err,
                session_token = %token,
                "Failed to restore session after queueing failed"
            ),
        }
        Err(e.into())
    }

    async fn load(&self, token: &str) -> Result<UploadSession, AppError> {
        if !is_well_formed_token(token) {
            return Err(AppError::NotFound("Upload session not found".to_string()));
        }
        self.sessions
            .get_session(token)
            .await?
            .ok_or_else(|| AppError::NotFound("Upload session not found".to_string()))
    }

    async fn delete_temp_bytes(&self, key: &str) {
        if let Err(e) = self.storage.delete(StorageTier::Temporary, key).await {
            tracing::warn!(error = %e, key = %key, "Failed to delete temporary upload");
        }
    }

    fn view(&self, session: &UploadSession, files: &[FileRecord]) -> SessionResponse {
        SessionResponse::new(session, files, session.expires_at(self.lifecycle.idle_timeout()))
    }
}

fn ensure_status(
    session: &UploadSession,
    allowed: &[SessionStatus],
    action: &str,
) -> Result<(), AppError> {
    if allowed.contains(&session.status) {
        Ok(())
    } else {
        Err(status_error(session, action))
    }
}

/// Gone for sessions that have expired or are being removed, Conflict otherwise.
fn status_error(session: &UploadSession, action: &str) -> AppError {
    let message = format!("Cannot {} a session in status {}", action, session.status);
    if session.status.is_gone() {
        AppError::Gone(message)
    } else {
        AppError::Conflict(message)
    }
}
