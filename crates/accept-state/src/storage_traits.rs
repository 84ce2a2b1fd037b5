//! Storage trait definitions for ACCEPT
//!
//! - `MemoStore`: key → serialized result, with explicit delete for forced
//!   recomputation.
//! - `MemoConnector`: opens independent handles onto the same backing
//!   store. The scheduler opens one for the calling side and a second one
//!   for its completion path; handles are never shared across those two.
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::key::MemoKey;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Persistent memo table.
///
/// Guarantees:
/// - `get` after `put(key, v)` returns exactly `v` until the key is deleted
///   or overwritten.
/// - `get` of an absent key is `Ok(None)`, never an error.
/// - `put` on an existing key overwrites it.
/// - `delete` of an absent key is a no-op.
///
/// Implementations must tolerate concurrent readers. Writers are
/// serialized by the caller.
#[async_trait]
pub trait MemoStore: Send + Sync {
    /// Look up a memoized value.
    async fn get(&self, key: &MemoKey) -> StorageResult<Option<Vec<u8>>>;

    /// Store (or overwrite) a value.
    async fn put(&self, key: &MemoKey, value: &[u8]) -> StorageResult<()>;

    /// Remove a value. No-op if absent.
    async fn delete(&self, key: &MemoKey) -> StorageResult<()>;

    /// Check whether a key is memoized.
    async fn contains(&self, key: &MemoKey) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Release the handle at the end of a session.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Opens handles onto one backing memo table.
#[async_trait]
pub trait MemoConnector: Send + Sync {
    /// Open a fresh handle. Every call returns a handle that may be moved
    /// to and used from a different task than any previously opened one.
    async fn open(&self) -> StorageResult<Arc<dyn MemoStore>>;
}
