use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use transfer_core::models::{FileRecord, SessionStatus, UploadSession};

use crate::store::{status_strings, AddFileOutcome, DraftReference, FileLimits, SessionStore};

const SESSION_COLUMNS: &str = "token, status, user_id, created_at, last_interaction_at";
const FILE_COLUMNS: &str = "id, session_token, name, size_bytes, tier, created_at, updated_at";

#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    #[tracing::instrument(skip(self, session), fields(session_token = %session.token))]
    async fn create_session(&self, session: &UploadSession) -> Result<UploadSession> {
        let created = sqlx::query_as::<Postgres, UploadSession>(&format!(
            r#"
            INSERT INTO upload_sessions (token, status, user_id, created_at, last_interaction_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(&session.token)
        .bind(session.status.as_str())
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.last_interaction_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert upload session")?;

        Ok(created)
    }

    async fn get_session(&self, token: &str) -> Result<Option<UploadSession>> {
        let session = sqlx::query_as::<Postgres, UploadSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch upload session")?;

        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    async fn transition(
        &self,
        token: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        touched_at: Option<DateTime<Utc>>,
    ) -> Result<Option<UploadSession>> {
        let session = sqlx::query_as::<Postgres, UploadSession>(&format!(
            r#"
            UPDATE upload_sessions
            SET status = $3,
                last_interaction_at = GREATEST(last_interaction_at, COALESCE($4, last_interaction_at))
            WHERE token = $1 AND status = ANY($2)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(token)
        .bind(status_strings(from))
        .bind(to.as_str())
        .bind(touched_at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to transition upload session")?;

        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    async fn transition_if_idle(
        &self,
        token: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        idle_before: DateTime<Utc>,
    ) -> Result<Option<UploadSession>> {
        let session = sqlx::query_as::<Postgres, UploadSession>(&format!(
            r#"
            UPDATE upload_sessions
            SET status = $3
            WHERE token = $1 AND status = ANY($2) AND last_interaction_at < $4
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(token)
        .bind(status_strings(from))
        .bind(to.as_str())
        .bind(idle_before)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to transition idle upload session")?;

        Ok(session)
    }

    async fn touch(&self, token: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET last_interaction_at = GREATEST(last_interaction_at, $2)
            WHERE token = $1
            "#,
        )
        .bind(token)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("Failed to touch upload session")?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_session(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM upload_sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("Failed to delete upload session")?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_idle_sessions(
        &self,
        statuses: &[SessionStatus],
        idle_before: DateTime<Utc>,
        reference: DraftReference,
    ) -> Result<Vec<UploadSession>> {
        let reference_clause = match reference {
            DraftReference::Referenced => {
                "AND EXISTS (SELECT 1 FROM in_progress_submissions d WHERE d.session_token = s.token)"
            }
            DraftReference::Unreferenced => {
                "AND NOT EXISTS (SELECT 1 FROM in_progress_submissions d WHERE d.session_token = s.token)"
            }
            DraftReference::Any => "",
        };

        let sessions = sqlx::query_as::<Postgres, UploadSession>(&format!(
            r#"
            SELECT s.token, s.status, s.user_id, s.created_at, s.last_interaction_at
            FROM upload_sessions s
            WHERE s.status = ANY($1) AND s.last_interaction_at < $2
            {reference_clause}
            ORDER BY s.last_interaction_at ASC
            "#
        ))
        .bind(status_strings(statuses))
        .bind(idle_before)
        .fetch_all(&self.pool)
        .await
        .context("Failed to find idle upload sessions")?;

        Ok(sessions)
    }

    async fn find_sessions_by_status(
        &self,
        statuses: &[SessionStatus],
    ) -> Result<Vec<UploadSession>> {
        let sessions = sqlx::query_as::<Postgres, UploadSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE status = ANY($1) ORDER BY created_at ASC"
        ))
        .bind(status_strings(statuses))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list upload sessions by status")?;

        Ok(sessions)
    }

    async fn list_files(&self, token: &str) -> Result<Vec<FileRecord>> {
        let files = sqlx::query_as::<Postgres, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM upload_files WHERE session_token = $1 ORDER BY created_at ASC, name ASC"
        ))
        .bind(token)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list session files")?;

        Ok(files)
    }

    #[tracing::instrument(skip(self, file), fields(session_token = %file.session_token, name = %file.name))]
    async fn add_file(&self, file: &FileRecord, limits: &FileLimits) -> Result<AddFileOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for file insert")?;

        // Lock the session row so the reaper cannot expire it underneath us.
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM upload_sessions WHERE token = $1 FOR UPDATE",
        )
        .bind(&file.session_token)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock upload session")?;

        let accepting = match status {
            Some(status) => status.parse::<SessionStatus>()?.accepts_uploads(),
            None => false,
        };
        if !accepting {
            return Ok(AddFileOutcome::SessionClosed);
        }

        // Caps are re-read under the lock; the caller's view may be stale.
        let (count, bytes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(size_bytes), 0)::BIGINT
            FROM upload_files
            WHERE session_token = $1 AND tier = 'TEMPORARY'
            "#,
        )
        .bind(&file.session_token)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read session usage")?;

        let count = count.max(0) as u64;
        let bytes = bytes.max(0) as u64;
        if count >= limits.max_files {
            return Ok(AddFileOutcome::TooManyFiles);
        }
        if bytes.saturating_add(file.size_bytes.max(0) as u64) > limits.max_total_bytes {
            return Ok(AddFileOutcome::TotalSizeExceeded);
        }

        let inserted = sqlx::query_as::<Postgres, FileRecord>(&format!(
            r#"
            INSERT INTO upload_files (id, session_token, name, size_bytes, tier, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_token, name) DO NOTHING
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(file.id)
        .bind(&file.session_token)
        .bind(&file.name)
        .bind(file.size_bytes)
        .bind(file.tier.as_str())
        .bind(file.created_at)
        .bind(file.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to insert session file")?;

        tx.commit()
            .await
            .context("Failed to commit file insert")?;

        Ok(match inserted {
            Some(record) => AddFileOutcome::Added(record),
            None => AddFileOutcome::DuplicateName,
        })
    }

    async fn remove_file(&self, token: &str, name: &str) -> Result<Option<FileRecord>> {
        let removed = sqlx::query_as::<Postgres, FileRecord>(&format!(
            "DELETE FROM upload_files WHERE session_token = $1 AND name = $2 RETURNING {FILE_COLUMNS}"
        ))
        .bind(token)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to remove session file")?;

        Ok(removed)
    }

    async fn mark_file_permanent(&self, file_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE upload_files
            SET tier = 'PERMANENT', updated_at = $2
            WHERE id = $1 AND tier = 'TEMPORARY'
            "#,
        )
        .bind(file_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("Failed to mark file permanent")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_temporary_files(&self, token: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM upload_files WHERE session_token = $1 AND tier = 'TEMPORARY'",
        )
        .bind(token)
        .execute(&self.pool)
        .await
        .context("Failed to delete temporary session files")?;

        Ok(result.rows_affected())
    }
}
