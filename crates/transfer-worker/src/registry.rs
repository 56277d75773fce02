//! Job handler registry
//!
//! Each [`JobType`] maps to exactly one handler. The worker looks the handler
//! up by the type stored on the claimed job.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use transfer_core::models::{Job, JobType};
use transfer_core::JobError;

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt of `job`.
    ///
    /// Return a [`JobError::unrecoverable`] (converted into `anyhow::Error`)
    /// to fail the job without spending its remaining attempts.
    async fn handle(&self, job: &Job) -> Result<serde_json::Value>;

    /// Called once the queue gives up on `job`: attempts used up, timed out
    /// on the last attempt, or failed unrecoverably. Lets the handler settle
    /// whatever state the job was meant to move forward.
    async fn on_failed(&self, _job: &Job, _error: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `job_type`, replacing any previous one.
    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> &mut Self {
        if self.handlers.insert(job_type, handler).is_some() {
            tracing::warn!(job_type = %job_type, "Replacing existing job handler");
        }
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<JobType> {
        self.handlers.keys().copied().collect()
    }

    /// Run the handler's give-up hook. Errors are logged, not returned.
    pub async fn notify_failed(&self, job: &Job, error: &str) {
        let Some(handler) = self.get(job.job_type) else {
            return;
        };
        if let Err(e) = handler.on_failed(job, error).await {
            tracing::error!(
                job_id = %job.id,
                job_type = %job.job_type,
                error = %format!("{:#}", e),
                "Job failure hook failed"
            );
        }
    }

    pub async fn dispatch(&self, job: &Job) -> Result<serde_json::Value> {
        let handler = self.get(job.job_type).ok_or_else(|| {
            JobError::unrecoverable(anyhow::anyhow!(
                "No handler registered for job type {}",
                job.job_type
            ))
        })?;
        handler.handle(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use transfer_core::models::JobStatus;
    use uuid::Uuid;

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        async fn handle(&self, job: &Job) -> Result<serde_json::Value> {
            Ok(job.payload.clone())
        }
    }

    fn job(job_type: JobType) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            job_type,
            status: JobStatus::Running,
            payload: serde_json::json!({"session_token": "abc"}),
            result: None,
            last_error: None,
            scheduled_at: now,
            started_at: Some(now),
            completed_at: None,
            attempts: 1,
            max_attempts: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let mut registry = JobRegistry::new();
        registry.register(JobType::PromoteSession, Arc::new(Echo));

        let result = registry.dispatch(&job(JobType::PromoteSession)).await.unwrap();
        assert_eq!(result["session_token"], "abc");
    }

    #[tokio::test]
    async fn default_failure_hook_does_nothing() {
        let mut registry = JobRegistry::new();
        registry.register(JobType::PromoteSession, Arc::new(Echo));
        registry
            .notify_failed(&job(JobType::PromoteSession), "gave up")
            .await;
        registry
            .notify_failed(&job(JobType::SendNotification), "no handler")
            .await;
    }

    #[tokio::test]
    async fn missing_handler_is_unrecoverable() {
        let registry = JobRegistry::new();
        let err = registry
            .dispatch(&job(JobType::SendNotification))
            .await
            .unwrap_err();
        let job_error = err.downcast_ref::<JobError>().unwrap();
        assert!(!job_error.is_recoverable());
    }
}
