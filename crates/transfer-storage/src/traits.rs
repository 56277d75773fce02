//! Storage abstraction trait
//!
//! Blob storage has two tiers: TEMPORARY holds uploads while a session is open,
//! PERMANENT holds them once the session has been promoted. Both tiers are
//! addressed by the same session-scoped relative key.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use transfer_core::models::StorageTier;
use transfer_core::{AppError, StorageBackend};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Copy failed: {0}")]
    CopyFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` under `key`, replacing whatever was there. Returns bytes written.
    async fn write(&self, tier: StorageTier, key: &str, data: Bytes) -> StorageResult<u64>;

    async fn read(&self, tier: StorageTier, key: &str) -> StorageResult<Bytes>;

    /// Delete one object. Deleting something that is not there succeeds.
    async fn delete(&self, tier: StorageTier, key: &str) -> StorageResult<()>;

    /// Delete every object whose key starts with `prefix`. Returns how many went.
    async fn delete_prefix(&self, tier: StorageTier, prefix: &str) -> StorageResult<u64>;

    async fn exists(&self, tier: StorageTier, key: &str) -> StorageResult<bool>;

    async fn content_length(&self, tier: StorageTier, key: &str) -> StorageResult<u64>;

    /// Copy an object from one tier to the same key in another tier.
    ///
    /// The destination either ends up complete or not at all.
    async fn copy_between(
        &self,
        from: StorageTier,
        to: StorageTier,
        key: &str,
    ) -> StorageResult<u64>;

    fn backend_type(&self) -> StorageBackend;
}
