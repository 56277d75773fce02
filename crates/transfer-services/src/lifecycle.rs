//! Session expiry, reaping and reminders
//!
//! One tick runs four sweeps over current state:
//!
//! 1. expire idle sessions a draft still points at (row kept, temp files dropped)
//! 2. delete idle sessions nothing points at
//! 3. schedule one expiry reminder per draft
//! 4. drop stored sessions past the retention window, when one is configured
//!
//! Each status change is conditional on the session still being idle, so a
//! user touching a session mid-sweep wins.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use transfer_core::models::{InProgressSubmission, JobKind, NotificationTemplate, SessionStatus, UploadSession};
use transfer_core::{Clock, LifecycleSettings};
use transfer_db::{DraftReference, DraftStore, SessionStore, UserStore};
use transfer_storage::{session_prefix, Storage, StorageTier};
use transfer_worker::JobQueue;

use crate::scheduler::ScheduledJob;

const OPEN: &[SessionStatus] = &[SessionStatus::Created, SessionStatus::Uploading];
const REAPABLE: &[SessionStatus] = &[
    SessionStatus::Created,
    SessionStatus::Uploading,
    SessionStatus::Expired,
];

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub deleted: usize,
    pub reminders: usize,
    pub retired: usize,
}

#[derive(Clone)]
pub struct LifecycleService {
    sessions: Arc<dyn SessionStore>,
    drafts: Arc<dyn DraftStore>,
    users: Arc<dyn UserStore>,
    storage: Arc<dyn Storage>,
    queue: JobQueue,
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
}

impl LifecycleService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        drafts: Arc<dyn DraftStore>,
        users: Arc<dyn UserStore>,
        storage: Arc<dyn Storage>,
        queue: JobQueue,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            sessions,
            drafts,
            users,
            storage,
            queue,
            clock,
            settings,
        }
    }

    #[tracing::instrument(skip(self), fields(lifecycle.operation = "tick"))]
    pub async fn run_tick(&self) -> Result<SweepReport> {
        let mut report = SweepReport {
            expired: self.expire_idle_sessions().await?,
            deleted: self.delete_orphaned_sessions().await?,
            reminders: self.schedule_reminders().await?,
            ..SweepReport::default()
        };
        report.retired = self.retire_stored_sessions().await?;

        if report != SweepReport::default() {
            tracing::info!(
                expired = report.expired,
                deleted = report.deleted,
                reminders = report.reminders,
                retired = report.retired,
                "Session sweep completed"
            );
        } else {
            tracing::debug!("Session sweep found nothing to do");
        }
        Ok(report)
    }

    /// Idle sessions still referenced by a draft become EXPIRED; their
    /// temporary files go but the row stays so the draft can resume it.
    #[tracing::instrument(skip(self), fields(lifecycle.sweep = "expire"))]
    async fn expire_idle_sessions(&self) -> Result<usize> {
        let idle_before = self.idle_cutoff();
        let candidates = self
            .sessions
            .find_idle_sessions(OPEN, idle_before, DraftReference::Referenced)
            .await
            .context("Failed to find idle referenced sessions")?;

        let mut expired = 0;
        for session in candidates {
            let Some(session) = self
                .sessions
                .transition_if_idle(&session.token, OPEN, SessionStatus::Expired, idle_before)
                .await
                .with_context(|| format!("Failed to expire session {}", session.token))?
            else {
                continue;
            };

            let prefix = session_prefix(&session.token)?;
            let removed = self
                .storage
                .delete_prefix(StorageTier::Temporary, &prefix)
                .await
                .with_context(|| format!("Failed to delete temporary files of {}", session.token))?;
            self.sessions
                .delete_temporary_files(&session.token)
                .await
                .with_context(|| format!("Failed to drop file records of {}", session.token))?;

            tracing::info!(session_token = %session.token, files_removed = removed, "Session expired");
            expired += 1;
        }
        Ok(expired)
    }

    /// Idle sessions nobody references are deleted outright, along with any
    /// session a previous tick left half-removed.
    #[tracing::instrument(skip(self), fields(lifecycle.sweep = "delete"))]
    async fn delete_orphaned_sessions(&self) -> Result<usize> {
        let mut deleted = 0;

        let leftovers = self
            .sessions
            .find_sessions_by_status(&[SessionStatus::RemovalInProgress])
            .await
            .context("Failed to find sessions pending removal")?;
        for session in leftovers {
            tracing::warn!(session_token = %session.token, "Finishing interrupted session removal");
            self.remove_session(&session).await?;
            deleted += 1;
        }

        let idle_before = self.idle_cutoff();
        let candidates = self
            .sessions
            .find_idle_sessions(REAPABLE, idle_before, DraftReference::Unreferenced)
            .await
            .context("Failed to find idle unreferenced sessions")?;

        for session in candidates {
            let Some(session) = self
                .sessions
                .transition_if_idle(
                    &session.token,
                    REAPABLE,
                    SessionStatus::RemovalInProgress,
                    idle_before,
                )
                .await
                .with_context(|| format!("Failed to claim session {} for removal", session.token))?
            else {
                continue;
            };
            self.remove_session(&session).await?;
            tracing::info!(session_token = %session.token, "Idle session deleted");
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Schedule the "about to expire" reminder for drafts whose session
    /// expires before the next tick could catch it.
    #[tracing::instrument(skip(self), fields(lifecycle.sweep = "reminders"))]
    async fn schedule_reminders(&self) -> Result<usize> {
        let now = self.clock.now();
        let lead = self.settings.reminder_lead();
        let window = lead + chrono::Duration::seconds(self.settings.sweep_interval_secs as i64);
        let touched_before = now + window - self.settings.idle_timeout();

        let candidates = self
            .drafts
            .find_reminder_candidates(OPEN, touched_before)
            .await
            .context("Failed to find drafts needing a reminder")?;

        let mut scheduled = 0;
        for (draft, session) in candidates {
            if !self
                .drafts
                .mark_reminder_sent(draft.id, now)
                .await
                .with_context(|| format!("Failed to mark reminder for draft {}", draft.id))?
            {
                continue;
            }

            let Some(email) = self.recipient(&draft, &session).await? else {
                tracing::debug!(draft_id = %draft.id, "Draft has no reachable owner, reminder skipped");
                continue;
            };

            let expires_at = session.expires_at(self.settings.idle_timeout());
            let delay = expires_at - lead - now;
            self.queue
                .enqueue_in(
                    delay,
                    JobKind::notify(
                        NotificationTemplate::SessionExpiring,
                        vec![email],
                        json!({
                            "session_token": session.token,
                            "draft_id": draft.id,
                            "title": draft.title,
                            "expires_at": expires_at.to_rfc3339(),
                        }),
                    ),
                )
                .await
                .with_context(|| format!("Failed to enqueue reminder for draft {}", draft.id))?;

            tracing::info!(
                draft_id = %draft.id,
                session_token = %session.token,
                expires_at = %expires_at,
                "Expiry reminder scheduled"
            );
            scheduled += 1;
        }
        Ok(scheduled)
    }

    /// Stored sessions past the retention window lose their row. Their
    /// permanent files belong to the submission and stay.
    #[tracing::instrument(skip(self), fields(lifecycle.sweep = "retention"))]
    async fn retire_stored_sessions(&self) -> Result<usize> {
        let Some(retention) = self.settings.stored_retention() else {
            return Ok(0);
        };
        let cutoff = self.clock.now() - retention;
        let stored = [SessionStatus::Stored];
        let candidates = self
            .sessions
            .find_idle_sessions(&stored, cutoff, DraftReference::Any)
            .await
            .context("Failed to find stored sessions past retention")?;

        let mut retired = 0;
        for session in candidates {
            if self
                .sessions
                .transition_if_idle(&session.token, &stored, SessionStatus::RemovalInProgress, cutoff)
                .await
                .with_context(|| format!("Failed to claim stored session {}", session.token))?
                .is_none()
            {
                continue;
            }
            self.remove_session(&session).await?;
            retired += 1;
        }
        Ok(retired)
    }

    /// Temporary bytes first, then the row. Only called on REMOVAL_IN_PROGRESS sessions.
    async fn remove_session(&self, session: &UploadSession) -> Result<()> {
        let prefix = session_prefix(&session.token)?;
        self.storage
            .delete_prefix(StorageTier::Temporary, &prefix)
            .await
            .with_context(|| format!("Failed to delete temporary files of {}", session.token))?;
        self.sessions
            .delete_session(&session.token)
            .await
            .with_context(|| format!("Failed to delete session {}", session.token))?;
        Ok(())
    }

    async fn recipient(
        &self,
        draft: &InProgressSubmission,
        session: &UploadSession,
    ) -> Result<Option<String>> {
        let Some(user_id) = draft.user_id.or(session.user_id) else {
            return Ok(None);
        };
        let user = self
            .users
            .find_user(user_id)
            .await
            .with_context(|| format!("Failed to look up user {}", user_id))?;
        Ok(user.map(|u| u.email))
    }

    fn idle_cutoff(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now() - self.settings.idle_timeout()
    }
}

#[async_trait]
impl ScheduledJob for LifecycleService {
    async fn run(&self) -> Result<()> {
        self.run_tick().await.map(|_| ())
    }
}
