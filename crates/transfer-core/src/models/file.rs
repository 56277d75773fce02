use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Which blob storage root a file's bytes live in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageTier {
    Temporary,
    Permanent,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Temporary => "TEMPORARY",
            StorageTier::Permanent => "PERMANENT",
        }
    }
}

impl Display for StorageTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StorageTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEMPORARY" => Ok(StorageTier::Temporary),
            "PERMANENT" => Ok(StorageTier::Permanent),
            _ => Err(anyhow::anyhow!("Invalid storage tier: {}", s)),
        }
    }
}

/// One uploaded file belonging to an upload session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileRecord {
    pub id: Uuid,
    pub session_token: String,
    pub name: String,
    pub size_bytes: i64,
    pub tier: StorageTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for FileRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(FileRecord {
            id: row.get("id"),
            session_token: row.get("session_token"),
            name: row.get("name"),
            size_bytes: row.get("size_bytes"),
            tier: row.get::<String, _>("tier").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse storage tier: {}", e).into())
            })?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl FileRecord {
    /// A freshly accepted upload, always starting in the temporary tier.
    pub fn new(session_token: &str, name: &str, size_bytes: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_token: session_token.to_string(),
            name: name.to_string(),
            size_bytes,
            tier: StorageTier::Temporary,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.tier == StorageTier::Temporary
    }
}
