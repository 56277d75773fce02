use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::notification::NotificationTemplate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    PromoteSession,
    SendNotification,
}

impl Display for JobType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobType::PromoteSession => write!(f, "promote_session"),
            JobType::SendNotification => write!(f, "send_notification"),
        }
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promote_session" => Ok(JobType::PromoteSession),
            "send_notification" => Ok(JobType::SendNotification),
            _ => Err(anyhow::anyhow!("Invalid job type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// A unit of background work as persisted by the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Job {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Job {
            id: row.get("id"),
            job_type: row.get::<String, _>("job_type").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse job_type: {}", e).into())
            })?,
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse job status: {}", e).into())
            })?,
            payload: row.get("payload"),
            result: row.get("result"),
            last_error: row.get("last_error"),
            scheduled_at: row.get("scheduled_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Job {
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn try_payload_as<P: JobPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Typed payload bound to exactly one job type.
pub trait JobPayload: Serialize + for<'de> Deserialize<'de> {
    fn job_type() -> JobType;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromoteSessionPayload {
    pub session_token: String,
}

impl JobPayload for PromoteSessionPayload {
    fn job_type() -> JobType {
        JobType::PromoteSession
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendNotificationPayload {
    pub template: NotificationTemplate,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl JobPayload for SendNotificationPayload {
    fn job_type() -> JobType {
        JobType::SendNotification
    }
}

/// Everything that can be put on the job queue.
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    PromoteSession(PromoteSessionPayload),
    SendNotification(SendNotificationPayload),
}

impl JobKind {
    pub fn promote(session_token: impl Into<String>) -> Self {
        JobKind::PromoteSession(PromoteSessionPayload {
            session_token: session_token.into(),
        })
    }

    pub fn notify(
        template: NotificationTemplate,
        recipients: Vec<String>,
        context: serde_json::Value,
    ) -> Self {
        JobKind::SendNotification(SendNotificationPayload {
            template,
            recipients,
            context,
        })
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobKind::PromoteSession(_) => PromoteSessionPayload::job_type(),
            JobKind::SendNotification(_) => SendNotificationPayload::job_type(),
        }
    }

    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            JobKind::PromoteSession(p) => serde_json::to_value(p),
            JobKind::SendNotification(p) => serde_json::to_value(p),
        }
    }

    /// Rebuild the typed job from a stored row.
    pub fn from_job(job: &Job) -> Result<Self, serde_json::Error> {
        Ok(match job.job_type {
            JobType::PromoteSession => JobKind::PromoteSession(job.try_payload_as()?),
            JobType::SendNotification => JobKind::SendNotification(job.try_payload_as()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_text_matches_serde() {
        let text = serde_json::to_value(JobType::SendNotification).unwrap();
        assert_eq!(text, serde_json::json!(JobType::SendNotification.to_string()));
        assert_eq!(
            "promote_session".parse::<JobType>().unwrap(),
            JobType::PromoteSession
        );
    }

    #[test]
    fn test_job_kind_rebuilds_from_stored_job() {
        let kind = JobKind::notify(
            NotificationTemplate::SubmissionFailed,
            vec!["user@example.org".to_string()],
            serde_json::json!({"session_token": "abc"}),
        );
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type: kind.job_type(),
            status: JobStatus::Pending,
            payload: kind.to_payload().unwrap(),
            result: None,
            last_error: None,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            attempts: 0,
            max_attempts: 3,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(JobKind::from_job(&job).unwrap(), kind);
    }
}
