//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryMemoStore` and `MemoryConnector` that satisfy the trait
//! contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::key::MemoKey;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryMemoStore
// ---------------------------------------------------------------------------

/// In-memory memo table backed by a `HashMap<digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryMemoStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
}

impl MemoryMemoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of `put` calls observed.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.store
            .lock()
            .map_err(|_| StorageError::Backend("memo store lock poisoned".to_string()))
    }
}

#[async_trait]
impl MemoStore for MemoryMemoStore {
    async fn get(&self, key: &MemoKey) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key.digest()).cloned())
    }

    async fn put(&self, key: &MemoKey, value: &[u8]) -> StorageResult<()> {
        self.lock()?.insert(key.digest().to_string(), value.to_vec());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &MemoKey) -> StorageResult<()> {
        self.lock()?.remove(key.digest());
        Ok(())
    }

    async fn contains(&self, key: &MemoKey) -> StorageResult<bool> {
        Ok(self.lock()?.contains_key(key.digest()))
    }
}

// ---------------------------------------------------------------------------
// MemoryConnector
// ---------------------------------------------------------------------------

/// Hands out handles onto one shared [`MemoryMemoStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryConnector {
    store: Arc<MemoryMemoStore>,
    opens: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared backing table, for assertions.
    pub fn store(&self) -> Arc<MemoryMemoStore> {
        Arc::clone(&self.store)
    }

    /// Number of handles opened so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemoConnector for MemoryConnector {
    async fn open(&self) -> StorageResult<Arc<dyn MemoStore>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone() as Arc<dyn MemoStore>)
    }
}
