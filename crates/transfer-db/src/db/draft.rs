use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use transfer_core::models::{InProgressSubmission, SessionStatus, UploadSession};

use crate::store::{status_strings, DraftStore};

const DRAFT_COLUMNS: &str = "id, user_id, session_token, title, last_updated_at, reminder_sent_at";

#[derive(Clone)]
pub struct DraftRepository {
    pool: PgPool,
}

impl DraftRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DraftStore for DraftRepository {
    #[tracing::instrument(skip(self, draft), fields(draft_id = %draft.id))]
    async fn save_draft(&self, draft: &InProgressSubmission) -> Result<InProgressSubmission> {
        let saved = sqlx::query_as::<Postgres, InProgressSubmission>(&format!(
            r#"
            INSERT INTO in_progress_submissions (id, user_id, session_token, title, last_updated_at, reminder_sent_at)
            VALUES ($1, $2, $3, $4, $5, NULL)
            ON CONFLICT (id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                session_token = EXCLUDED.session_token,
                title = EXCLUDED.title,
                last_updated_at = EXCLUDED.last_updated_at,
                reminder_sent_at = NULL
            RETURNING {DRAFT_COLUMNS}
            "#
        ))
        .bind(draft.id)
        .bind(draft.user_id)
        .bind(&draft.session_token)
        .bind(&draft.title)
        .bind(draft.last_updated_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to save in-progress submission")?;

        Ok(saved)
    }

    async fn get_draft(&self, id: Uuid) -> Result<Option<InProgressSubmission>> {
        let draft = sqlx::query_as::<Postgres, InProgressSubmission>(&format!(
            "SELECT {DRAFT_COLUMNS} FROM in_progress_submissions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch in-progress submission")?;

        Ok(draft)
    }

    async fn find_draft_by_session(&self, token: &str) -> Result<Option<InProgressSubmission>> {
        let draft = sqlx::query_as::<Postgres, InProgressSubmission>(&format!(
            "SELECT {DRAFT_COLUMNS} FROM in_progress_submissions WHERE session_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch in-progress submission by session")?;

        Ok(draft)
    }

    async fn delete_draft(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM in_progress_submissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete in-progress submission")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_drafts_for_session(&self, token: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM in_progress_submissions WHERE session_token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("Failed to delete in-progress submissions for session")?;

        Ok(result.rows_affected())
    }

    async fn find_reminder_candidates(
        &self,
        statuses: &[SessionStatus],
        touched_before: DateTime<Utc>,
    ) -> Result<Vec<(InProgressSubmission, UploadSession)>> {
        let rows = sqlx::query(
            r#"
            SELECT
                d.id, d.user_id, d.session_token, d.title, d.last_updated_at, d.reminder_sent_at,
                s.token, s.status, s.user_id AS session_user_id, s.created_at, s.last_interaction_at
            FROM in_progress_submissions d
            JOIN upload_sessions s ON s.token = d.session_token
            WHERE d.reminder_sent_at IS NULL
                AND s.status = ANY($1)
                AND s.last_interaction_at <= $2
            ORDER BY s.last_interaction_at ASC
            "#,
        )
        .bind(status_strings(statuses))
        .bind(touched_before)
        .fetch_all(&self.pool)
        .await
        .context("Failed to find drafts needing an expiry reminder")?;

        rows.iter()
            .map(|row| {
                let draft = InProgressSubmission {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    session_token: row.get("session_token"),
                    title: row.get("title"),
                    last_updated_at: row.get("last_updated_at"),
                    reminder_sent_at: row.get("reminder_sent_at"),
                };
                let session = UploadSession {
                    token: row.get("token"),
                    status: row.get::<String, _>("status").parse()?,
                    user_id: row.get("session_user_id"),
                    created_at: row.get("created_at"),
                    last_interaction_at: row.get("last_interaction_at"),
                };
                Ok((draft, session))
            })
            .collect()
    }

    async fn mark_reminder_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE in_progress_submissions
            SET reminder_sent_at = $2
            WHERE id = $1 AND reminder_sent_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("Failed to mark reminder sent")?;

        Ok(result.rows_affected() > 0)
    }
}
