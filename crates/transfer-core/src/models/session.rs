use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::file::{FileRecord, StorageTier};

/// Number of random bytes behind a session token (rendered as hex).
pub const SESSION_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Uploading,
    Expired,
    CopyInProgress,
    Stored,
    CopyFailed,
    RemovalInProgress,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "CREATED",
            SessionStatus::Uploading => "UPLOADING",
            SessionStatus::Expired => "EXPIRED",
            SessionStatus::CopyInProgress => "COPY_IN_PROGRESS",
            SessionStatus::Stored => "STORED",
            SessionStatus::CopyFailed => "COPY_FAILED",
            SessionStatus::RemovalInProgress => "REMOVAL_IN_PROGRESS",
        }
    }

    /// Statuses in which new files may be added.
    pub fn accepts_uploads(&self) -> bool {
        matches!(self, SessionStatus::Created | SessionStatus::Uploading)
    }

    /// Statuses the reaper is allowed to delete. Never includes a session
    /// that is being promoted or has been stored.
    pub fn is_reapable(&self) -> bool {
        matches!(
            self,
            SessionStatus::Created | SessionStatus::Uploading | SessionStatus::Expired
        )
    }

    /// Statuses in which the session's bytes are gone or going away.
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            SessionStatus::Expired | SessionStatus::RemovalInProgress
        )
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(SessionStatus::Created),
            "UPLOADING" => Ok(SessionStatus::Uploading),
            "EXPIRED" => Ok(SessionStatus::Expired),
            "COPY_IN_PROGRESS" => Ok(SessionStatus::CopyInProgress),
            "STORED" => Ok(SessionStatus::Stored),
            "COPY_FAILED" => Ok(SessionStatus::CopyFailed),
            "REMOVAL_IN_PROGRESS" => Ok(SessionStatus::RemovalInProgress),
            _ => Err(anyhow::anyhow!("Invalid session status: {}", s)),
        }
    }
}

/// A window in which a user stages files before they are promoted or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub token: String,
    pub status: SessionStatus,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_interaction_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for UploadSession {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(UploadSession {
            token: row.get("token"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse session status: {}", e).into())
            })?,
            user_id: row.get("user_id"),
            created_at: row.get("created_at"),
            last_interaction_at: row.get("last_interaction_at"),
        })
    }
}

impl UploadSession {
    pub fn new(user_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            token: generate_session_token(),
            status: SessionStatus::Created,
            user_id,
            created_at: now,
            last_interaction_at: now,
        }
    }

    pub fn expires_at(&self, idle_timeout: Duration) -> DateTime<Utc> {
        self.last_interaction_at + idle_timeout
    }

    /// True once the session has been left alone for longer than `idle_timeout`.
    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        self.last_interaction_at < now - idle_timeout
    }
}

/// Random, unguessable session token.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reject anything that could not have come from [`generate_session_token`].
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == SESSION_TOKEN_BYTES * 2 && token.chars().all(|c| c.is_ascii_hexdigit())
}

/// Counts the admission policy needs about a session's current contents.
///
/// Only TEMPORARY files contribute to the count and the byte total; names of
/// every file are kept so duplicates are caught regardless of tier.
#[derive(Debug, Clone, Default)]
pub struct SessionUsage {
    pub file_count: u64,
    pub total_bytes: u64,
    pub file_names: Vec<String>,
}

impl SessionUsage {
    pub fn from_files(files: &[FileRecord]) -> Self {
        let mut usage = SessionUsage::default();
        for file in files {
            if file.tier == StorageTier::Temporary {
                usage.file_count += 1;
                usage.total_bytes += file.size_bytes.max(0) as u64;
            }
            usage.file_names.push(file.name.clone());
        }
        usage
    }

    pub fn has_file_named(&self, name: &str) -> bool {
        self.file_names.iter().any(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            SessionStatus::Created,
            SessionStatus::Uploading,
            SessionStatus::Expired,
            SessionStatus::CopyInProgress,
            SessionStatus::Stored,
            SessionStatus::CopyFailed,
            SessionStatus::RemovalInProgress,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("copying".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_reaper_never_touches_promoting_or_stored_sessions() {
        assert!(!SessionStatus::CopyInProgress.is_reapable());
        assert!(!SessionStatus::Stored.is_reapable());
        assert!(!SessionStatus::CopyFailed.is_reapable());
        assert!(SessionStatus::Expired.is_reapable());
    }

    #[test]
    fn test_generated_tokens_are_well_formed_and_distinct() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert!(is_well_formed_token(&a));
        assert_ne!(a, b);
        assert!(!is_well_formed_token("../etc/passwd"));
    }

    #[test]
    fn test_idle_is_strictly_past_timeout() {
        let now = Utc::now();
        let mut session = UploadSession::new(None, now);
        session.last_interaction_at = now - Duration::minutes(30);
        assert!(!session.is_idle(now, Duration::minutes(30)));
        assert!(session.is_idle(now + Duration::seconds(1), Duration::minutes(30)));
    }

    #[test]
    fn test_usage_counts_only_temporary_bytes() {
        let now = Utc::now();
        let mut stored = FileRecord::new("tok", "a.pdf", 100, now);
        stored.tier = StorageTier::Permanent;
        let temp = FileRecord::new("tok", "b.pdf", 50, now);
        let usage = SessionUsage::from_files(&[stored, temp]);
        assert_eq!(usage.total_bytes, 50);
        assert_eq!(usage.file_count, 1);
        assert!(usage.has_file_named("a.pdf"));
    }
}
