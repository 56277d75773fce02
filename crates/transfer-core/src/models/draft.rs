use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A user's saved, not-yet-submitted transfer.
///
/// The draft points at an upload session; the session never points back.
/// While a draft references a session, the reaper may expire that session
/// but must not delete it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InProgressSubmission {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_token: Option<String>,
    pub title: Option<String>,
    pub last_updated_at: DateTime<Utc>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for InProgressSubmission {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(InProgressSubmission {
            id: row.get("id"),
            user_id: row.get("user_id"),
            session_token: row.get("session_token"),
            title: row.get("title"),
            last_updated_at: row.get("last_updated_at"),
            reminder_sent_at: row.get("reminder_sent_at"),
        })
    }
}

impl InProgressSubmission {
    pub fn new(
        user_id: Option<Uuid>,
        session_token: Option<String>,
        title: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_token,
            title,
            last_updated_at: now,
            reminder_sent_at: None,
        }
    }
}
