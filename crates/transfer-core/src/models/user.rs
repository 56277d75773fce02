use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The slice of a portal account the upload service needs: who to email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
}
