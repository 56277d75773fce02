//! Transfer Storage Library
//!
//! Two-tier blob storage for upload sessions: the [`Storage`] trait plus a
//! local filesystem backend and an in-memory backend.
//!
//! # Storage key format
//!
//! `sessions/{token}/{filename}`, identical in both tiers. Keys must not
//! contain `..` segments or a leading `/`. Key construction lives in [`keys`].

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use keys::{session_file_key, session_prefix};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use transfer_core::models::StorageTier;
pub use transfer_core::StorageBackend;
pub use traits::{Storage, StorageError, StorageResult};
