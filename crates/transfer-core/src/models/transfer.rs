use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::file::{FileRecord, StorageTier};
use super::session::{SessionStatus, UploadSession};

/// Request to open a new upload session
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Owning portal user, if known
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileResponse {
    pub name: String,
    pub size_bytes: i64,
    pub tier: StorageTier,
    pub created_at: DateTime<Utc>,
}

impl From<&FileRecord> for FileResponse {
    fn from(file: &FileRecord) -> Self {
        Self {
            name: file.name.clone(),
            size_bytes: file.size_bytes,
            tier: file.tier,
            created_at: file.created_at,
        }
    }
}

/// Current state of an upload session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub token: String,
    pub status: SessionStatus,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_interaction_at: DateTime<Utc>,
    /// When the session becomes eligible for expiry if left alone
    pub expires_at: DateTime<Utc>,
    /// Number of files still in temporary storage
    pub file_count: u64,
    /// Bytes still in temporary storage
    pub total_size_bytes: u64,
    pub files: Vec<FileResponse>,
}

impl SessionResponse {
    pub fn new(session: &UploadSession, files: &[FileRecord], expires_at: DateTime<Utc>) -> Self {
        let temporary = files.iter().filter(|f| f.is_temporary());
        Self {
            token: session.token.clone(),
            status: session.status,
            user_id: session.user_id,
            created_at: session.created_at,
            last_interaction_at: session.last_interaction_at,
            expires_at,
            file_count: temporary.clone().count() as u64,
            total_size_bytes: temporary.map(|f| f.size_bytes.max(0) as u64).sum(),
            files: files.iter().map(FileResponse::from).collect(),
        }
    }
}

/// Ask whether a file would be accepted, before sending its bytes
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CheckFileRequest {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub filename: String,
    /// Declared size in bytes, as a number or a numeric string
    #[schema(value_type = String, example = "1048576")]
    pub filesize: serde_json::Value,
    /// Session the file would be added to; omit for a pre-session check
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckFileResponse {
    pub accepted: bool,
}

/// Save (or re-save) a draft submission that tracks an upload session
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SaveDraftRequest {
    /// Existing draft to update; omit to create a new one
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    #[validate(length(max = 255, message = "Title must be at most 255 characters"))]
    pub title: Option<String>,
}
