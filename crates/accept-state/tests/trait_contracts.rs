//! Trait contract tests for MemoStore and MemoConnector.
//!
//! The same contract is checked against the in-memory fake and the
//! SurrealDB store (`mem://` and `surrealkv://`).

use accept_state::fakes::{MemoryConnector, MemoryMemoStore};
use accept_state::storage_traits::*;
use accept_state::{MemoKey, MemoLocation, SurrealConnector, SurrealMemoStore};
use serde_json::json;

fn key(n: u32) -> MemoKey {
    MemoKey::new("build_and_execute", &json!(["apps/sobel", null, n, false])).unwrap()
}

async fn check_contract(store: &dyn MemoStore) {
    let k = key(0);

    assert_eq!(store.get(&k).await.unwrap(), None);
    assert!(!store.contains(&k).await.unwrap());

    store.put(&k, b"first").await.unwrap();
    assert_eq!(store.get(&k).await.unwrap().as_deref(), Some(&b"first"[..]));
    assert!(store.contains(&k).await.unwrap());

    store.put(&k, b"second").await.unwrap();
    assert_eq!(store.get(&k).await.unwrap().as_deref(), Some(&b"second"[..]));

    let other = key(1);
    assert_eq!(store.get(&other).await.unwrap(), None);

    store.delete(&k).await.unwrap();
    assert_eq!(store.get(&k).await.unwrap(), None);

    // Deleting an absent key is fine.
    store.delete(&k).await.unwrap();
}

// ===========================================================================
// MemoryMemoStore
// ===========================================================================

#[tokio::test]
async fn memory_store_satisfies_contract() {
    let store = MemoryMemoStore::new();
    check_contract(&store).await;
}

#[tokio::test]
async fn memory_store_counts_puts() {
    let store = MemoryMemoStore::new();
    store.put(&key(0), b"a").await.unwrap();
    store.put(&key(0), b"b").await.unwrap();
    assert_eq!(store.put_count(), 2);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn memory_connector_handles_share_one_table() {
    let connector = MemoryConnector::new();
    let a = connector.open().await.unwrap();
    let b = connector.open().await.unwrap();

    a.put(&key(3), b"shared").await.unwrap();
    assert_eq!(b.get(&key(3)).await.unwrap().as_deref(), Some(&b"shared"[..]));
    assert_eq!(connector.open_count(), 2);
}

// ===========================================================================
// SurrealMemoStore
// ===========================================================================

#[tokio::test]
async fn surreal_store_satisfies_contract() {
    let store = SurrealMemoStore::in_memory().await.unwrap();
    check_contract(&store).await;
}

#[tokio::test]
async fn surreal_store_roundtrips_binary_values() {
    let store = SurrealMemoStore::in_memory().await.unwrap();
    let bytes: Vec<u8> = (0u8..=255).collect();
    store.put(&key(7), &bytes).await.unwrap();
    assert_eq!(store.get(&key(7)).await.unwrap(), Some(bytes));
}

#[tokio::test]
async fn surreal_connector_handles_share_one_table() {
    let connector = SurrealConnector::new(MemoLocation::InMemory);
    let a = connector.open().await.unwrap();
    let b = connector.open().await.unwrap();

    a.put(&key(4), b"from a").await.unwrap();
    assert_eq!(b.get(&key(4)).await.unwrap().as_deref(), Some(&b"from a"[..]));
}

#[tokio::test]
async fn surreal_file_store_satisfies_contract() {
    let dir = tempfile::tempdir().unwrap();
    let connector = SurrealConnector::new(MemoLocation::File(dir.path().join("memo.db")));
    let store = connector.open().await.unwrap();
    check_contract(store.as_ref()).await;
    assert!(dir.path().join("memo.db").exists());
}
