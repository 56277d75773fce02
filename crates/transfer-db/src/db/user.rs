use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use transfer_core::models::User;

use crate::store::UserStore;

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<Postgres, User>(
            "SELECT id, email, display_name FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        Ok(user)
    }
}
