//! Copying finalized sessions into permanent storage
//!
//! A promotion runs whole-session attempts. Each attempt copies the session's
//! TEMPORARY files and flips them to PERMANENT one at a time, so a retried
//! attempt (or a re-delivered job) only redoes what is left. Between attempts
//! the session drops back to UPLOADING and is re-claimed with a conditional
//! update; losing that race ends the promotion without side effects.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use transfer_core::models::{
    Job, JobKind, NotificationTemplate, PromoteSessionPayload, SessionStatus, StorageTier,
    UploadSession,
};
use transfer_core::{Clock, JobResultExt, PromotionSettings};
use transfer_db::{SessionStore, UserStore};
use transfer_storage::{session_file_key, Storage};
use transfer_worker::{JobHandler, JobQueue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PromotionOutcome {
    Stored { files_promoted: usize },
    /// Nothing to do; the session was stored by an earlier run.
    AlreadyStored,
    /// Every attempt failed; the session is COPY_FAILED.
    Failed { attempts: u32 },
    /// The session was not (or stopped being) ours to promote.
    Aborted { status: SessionStatus },
}

#[derive(Clone)]
pub struct PromotionService {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    storage: Arc<dyn Storage>,
    queue: JobQueue,
    clock: Arc<dyn Clock>,
    settings: PromotionSettings,
}

impl PromotionService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        storage: Arc<dyn Storage>,
        queue: JobQueue,
        clock: Arc<dyn Clock>,
        settings: PromotionSettings,
    ) -> Self {
        Self {
            sessions,
            users,
            storage,
            queue,
            clock,
            settings,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn promote(&self, token: &str) -> Result<PromotionOutcome> {
        let session = self
            .sessions
            .get_session(token)
            .await?
            .with_context(|| format!("Upload session {} not found", token))?;

        match session.status {
            SessionStatus::CopyInProgress => {}
            SessionStatus::Stored => {
                tracing::info!(session_token = %token, "Session already stored");
                return Ok(PromotionOutcome::AlreadyStored);
            }
            status => {
                tracing::warn!(session_token = %token, status = %status, "Session is not awaiting promotion");
                return Ok(PromotionOutcome::Aborted { status });
            }
        }

        let max_attempts = self.settings.max_copy_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 && !self.reclaim(token, SessionStatus::Uploading, SessionStatus::CopyInProgress).await? {
                return self.aborted(token).await;
            }

            let result = tokio::time::timeout(
                self.settings.copy_attempt_timeout(),
                self.copy_files(token),
            )
            .await;

            let error = match result {
                Ok(Ok(files_promoted)) => {
                    if !self.reclaim(token, SessionStatus::CopyInProgress, SessionStatus::Stored).await? {
                        return self.aborted(token).await;
                    }
                    tracing::info!(session_token = %token, attempt, files_promoted, "Session stored");
                    self.notify_stored(&session, files_promoted).await;
                    return Ok(PromotionOutcome::Stored { files_promoted });
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(_) => format!(
                    "Copy attempt timed out after {}s",
                    self.settings.copy_attempt_timeout_secs
                ),
            };

            tracing::error!(
                session_token = %token,
                attempt,
                max_attempts,
                error = %error,
                "Copy attempt failed"
            );
            last_error = error;

            // Touched on the way back so the idle sweep does not take it between attempts.
            if attempt < max_attempts
                && self
                    .sessions
                    .transition(
                        token,
                        &[SessionStatus::CopyInProgress],
                        SessionStatus::Uploading,
                        Some(self.clock.now()),
                    )
                    .await?
                    .is_none()
            {
                return self.aborted(token).await;
            }
        }

        if !self.reclaim(token, SessionStatus::CopyInProgress, SessionStatus::CopyFailed).await? {
            return self.aborted(token).await;
        }
        self.notify_failed(&session, max_attempts, &last_error).await;
        Ok(PromotionOutcome::Failed {
            attempts: max_attempts,
        })
    }

    /// Settle a session whose promotion job the queue gave up on, e.g. after
    /// the job timed out or kept failing before [`Self::promote`] could
    /// record an outcome. Returns false when the session had already moved on.
    #[tracing::instrument(skip(self))]
    pub async fn give_up(&self, token: &str, error: &str) -> Result<bool> {
        let Some(session) = self
            .sessions
            .transition(
                token,
                &[SessionStatus::CopyInProgress],
                SessionStatus::CopyFailed,
                None,
            )
            .await?
        else {
            return Ok(false);
        };
        tracing::error!(session_token = %token, error = %error, "Promotion abandoned by the job queue");
        self.notify_failed(&session, self.settings.max_copy_retries, error)
            .await;
        Ok(true)
    }

    /// One attempt: copy, flip and clean up every remaining TEMPORARY file.
    async fn copy_files(&self, token: &str) -> Result<usize> {
        let files = self.sessions.list_files(token).await?;
        let mut promoted = 0;

        for file in files.iter().filter(|f| f.is_temporary()) {
            let key = session_file_key(token, &file.name)?;
            let expected = file.size_bytes.max(0) as u64;

            let already_copied = self.storage.exists(StorageTier::Permanent, &key).await?
                && self.storage.content_length(StorageTier::Permanent, &key).await? == expected;
            if already_copied {
                tracing::debug!(session_token = %token, file = %file.name, "Permanent copy already present");
            } else {
                self.storage
                    .copy_between(StorageTier::Temporary, StorageTier::Permanent, &key)
                    .await
                    .with_context(|| format!("Failed to copy {} to permanent storage", file.name))?;
            }

            if self
                .sessions
                .mark_file_permanent(file.id, self.clock.now())
                .await?
            {
                promoted += 1;
            }

            if let Err(e) = self.storage.delete(StorageTier::Temporary, &key).await {
                tracing::warn!(
                    error = %e,
                    session_token = %token,
                    file = %file.name,
                    "Failed to delete temporary copy after promotion"
                );
            }
        }

        Ok(promoted)
    }

    async fn reclaim(&self, token: &str, from: SessionStatus, to: SessionStatus) -> Result<bool> {
        Ok(self
            .sessions
            .transition(token, &[from], to, None)
            .await?
            .is_some())
    }

    async fn aborted(&self, token: &str) -> Result<PromotionOutcome> {
        let status = self
            .sessions
            .get_session(token)
            .await?
            .map(|s| s.status)
            .unwrap_or(SessionStatus::RemovalInProgress);
        tracing::warn!(session_token = %token, status = %status, "Promotion lost its session to another transition");
        Ok(PromotionOutcome::Aborted { status })
    }

    async fn notify_stored(&self, session: &UploadSession, files_promoted: usize) {
        let user_email = self.user_email(session).await;
        let context = json!({
            "session_token": session.token,
            "file_count": files_promoted,
            "user_email": user_email,
        });
        self.enqueue_notification(
            NotificationTemplate::SubmissionReceived,
            user_email.into_iter().collect(),
            context.clone(),
        )
        .await;
        self.enqueue_notification(
            NotificationTemplate::SubmissionReceivedAdmin,
            self.settings.admin_notification_emails.clone(),
            context,
        )
        .await;
    }

    async fn notify_failed(&self, session: &UploadSession, attempts: u32, last_error: &str) {
        let user_email = self.user_email(session).await;
        let context = json!({
            "session_token": session.token,
            "attempts": attempts,
            "last_error": last_error,
            "user_email": user_email,
        });
        self.enqueue_notification(
            NotificationTemplate::SubmissionFailed,
            user_email.into_iter().collect(),
            context.clone(),
        )
        .await;
        self.enqueue_notification(
            NotificationTemplate::SubmissionFailedAdmin,
            self.settings.admin_notification_emails.clone(),
            context,
        )
        .await;
    }

    async fn user_email(&self, session: &UploadSession) -> Option<String> {
        let user_id = session.user_id?;
        match self.users.find_user(user_id).await {
            Ok(user) => user.map(|u| u.email),
            Err(e) => {
                tracing::error!(error = %e, user_id = %user_id, "Failed to look up user for notification");
                None
            }
        }
    }

    /// The session outcome is already committed, so a failure here is only logged.
    async fn enqueue_notification(
        &self,
        template: NotificationTemplate,
        recipients: Vec<String>,
        context: Value,
    ) {
        if recipients.is_empty() {
            tracing::debug!(template = %template, "No recipients, notification skipped");
            return;
        }
        if let Err(e) = self
            .queue
            .enqueue(JobKind::notify(template, recipients, context))
            .await
        {
            tracing::error!(error = %e, template = %template, "Failed to enqueue notification");
        }
    }
}

/// Job handler for `promote_session`.
pub struct PromoteSessionHandler {
    promotion: Arc<PromotionService>,
}

impl PromoteSessionHandler {
    pub fn new(promotion: Arc<PromotionService>) -> Self {
        Self { promotion }
    }
}

#[async_trait]
impl JobHandler for PromoteSessionHandler {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    async fn handle(&self, job: &Job) -> Result<Value> {
        let payload: PromoteSessionPayload = job.try_payload_as().unrecoverable()?;
        let outcome = self.promotion.promote(&payload.session_token).await?;
        Ok(serde_json::to_value(outcome)?)
    }

    async fn on_failed(&self, job: &Job, error: &str) -> Result<()> {
        let payload: PromoteSessionPayload = job.try_payload_as()?;
        self.promotion.give_up(&payload.session_token, error).await?;
        Ok(())
    }
}
