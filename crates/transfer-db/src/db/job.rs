use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use transfer_core::models::{Job, JobStatus, JobType};

use crate::store::JobStore;

const JOB_COLUMNS: &str = "id, job_type, status, payload, result, last_error, scheduled_at, \
     started_at, completed_at, attempts, max_attempts, created_at, updated_at";

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    #[tracing::instrument(skip(self, payload))]
    async fn insert_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        scheduled_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Job> {
        let job = sqlx::query_as::<Postgres, Job>(&format!(
            r#"
            INSERT INTO jobs (job_type, status, payload, scheduled_at, max_attempts)
            VALUES ($1, 'pending', $2, $3, $4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_type.to_string())
        .bind(payload)
        .bind(scheduled_at)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert job")?;

        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Job enqueued");

        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<Postgres, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job")?;

        Ok(job)
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<Postgres, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at ASC
            "#
        ))
        .bind(status.map(|s| s.to_string()))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list jobs")?;

        Ok(jobs)
    }

    /// Uses FOR UPDATE SKIP LOCKED so several workers can poll the same table.
    #[tracing::instrument(skip(self))]
    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let next: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM jobs
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch next job")?;

        let Some((id,)) = next else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let job = sqlx::query_as::<Postgres, Job>(&format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                attempts = attempts + 1,
                started_at = $2,
                updated_at = $2
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to update job status")?;

        tx.commit().await.context("Failed to commit transaction")?;

        tracing::debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            "Job claimed"
        );

        Ok(Some(job))
    }

    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', result = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await
        .context("Failed to mark job completed")?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', last_error = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to mark job failed")?;

        tracing::warn!(job_id = %id, error = %error, "Job failed");

        Ok(())
    }

    async fn reschedule(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', last_error = $2, scheduled_at = $3,
                started_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(run_at)
        .execute(&self.pool)
        .await
        .context("Failed to reschedule job")?;

        Ok(())
    }

    async fn requeue_stale(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', started_at = NULL, updated_at = NOW()
            WHERE status = 'running' AND started_at < $1
            "#,
        )
        .bind(started_before)
        .execute(&self.pool)
        .await
        .context("Failed to requeue stale jobs")?;

        Ok(result.rows_affected())
    }
}
