use crate::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use transfer_core::models::StorageTier;
use transfer_core::StorageBackend;

/// Local filesystem storage with one root directory per tier
#[derive(Clone)]
pub struct LocalStorage {
    temp_root: PathBuf,
    permanent_root: PathBuf,
}

impl LocalStorage {
    /// Create both root directories if they do not exist yet.
    pub async fn new(
        temp_root: impl Into<PathBuf>,
        permanent_root: impl Into<PathBuf>,
    ) -> StorageResult<Self> {
        let temp_root = temp_root.into();
        let permanent_root = permanent_root.into();

        for root in [&temp_root, &permanent_root] {
            fs::create_dir_all(root).await.map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }

        Ok(LocalStorage {
            temp_root,
            permanent_root,
        })
    }

    fn root(&self, tier: StorageTier) -> &Path {
        match tier {
            StorageTier::Temporary => &self.temp_root,
            StorageTier::Permanent => &self.permanent_root,
        }
    }

    /// Resolve a key inside a tier root, refusing anything that could climb out of it.
    fn key_to_path(&self, tier: StorageTier, storage_key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(storage_key);
        if storage_key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "Storage key contains invalid path components: {}",
                storage_key
            )));
        }
        Ok(self.root(tier).join(relative))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn write_file(path: &Path, data: &[u8]) -> StorageResult<()> {
        let mut file = fs::File::create(path).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(data).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, tier: StorageTier, key: &str, data: Bytes) -> StorageResult<u64> {
        let path = self.key_to_path(tier, key)?;
        let size = data.len() as u64;

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();
        Self::write_file(&path, &data).await?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            tier = %tier,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage write successful"
        );

        Ok(size)
    }

    async fn read(&self, tier: StorageTier, key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(tier, key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            StorageError::ReadFailed(format!("Failed to read file {}: {}", path.display(), e))
        })?;

        Ok(Bytes::from(data))
    }

    async fn delete(&self, tier: StorageTier, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(tier, key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), key = %key, tier = %tier, "Local storage delete successful");
        Ok(())
    }

    async fn delete_prefix(&self, tier: StorageTier, prefix: &str) -> StorageResult<u64> {
        let dir = self.key_to_path(tier, prefix.trim_end_matches('/'))?;

        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(0);
        }

        let mut removed = 0u64;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                removed += 1;
            }
        }

        fs::remove_dir_all(&dir).await.map_err(|e| {
            StorageError::DeleteFailed(format!(
                "Failed to delete directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        tracing::info!(path = %dir.display(), tier = %tier, files_removed = removed, "Local storage prefix deleted");
        Ok(removed)
    }

    async fn exists(&self, tier: StorageTier, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(tier, key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn content_length(&self, tier: StorageTier, key: &str) -> StorageResult<u64> {
        let path = self.key_to_path(tier, key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn copy_between(
        &self,
        from: StorageTier,
        to: StorageTier,
        key: &str,
    ) -> StorageResult<u64> {
        let from_path = self.key_to_path(from, key)?;
        let to_path = self.key_to_path(to, key)?;

        if !fs::try_exists(&from_path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.ensure_parent_dir(&to_path).await?;

        // Copy beside the destination and rename into place.
        let staging = partial_path(&to_path);
        let start = std::time::Instant::now();
        let copied = fs::copy(&from_path, &staging).await.map_err(|e| {
            StorageError::CopyFailed(format!(
                "Failed to copy {} to {}: {}",
                from_path.display(),
                staging.display(),
                e
            ))
        })?;
        fs::rename(&staging, &to_path).await.map_err(|e| {
            StorageError::CopyFailed(format!(
                "Failed to move {} into place: {}",
                to_path.display(),
                e
            ))
        })?;

        tracing::info!(
            key = %key,
            from_path = %from_path.display(),
            to_path = %to_path.display(),
            size_bytes = copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage copy successful"
        );

        Ok(copied)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
