//! SurrealDB-backed MemoStore implementation
//!
//! Values are stored hex-encoded in a single `memo` table keyed by the
//! digest of the canonical [`MemoKey`]. The database is either a local
//! `surrealkv://` directory (persistent across runs) or `mem://` (tests).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::key::MemoKey;
use crate::migrations;
use crate::storage_traits::{MemoConnector, MemoStore, StorageResult};

/// Where the memo database lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoLocation {
    /// Volatile in-process database.
    InMemory,
    /// On-disk database directory shared across runs.
    File(PathBuf),
}

impl MemoLocation {
    fn url(&self) -> String {
        match self {
            MemoLocation::InMemory => "mem://".to_string(),
            MemoLocation::File(path) => format!("surrealkv://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoRow {
    key: String,
    args: String,
    value: String,
    stored_at: String,
}

/// SurrealDB-backed implementation of [`MemoStore`].
#[derive(Clone)]
pub struct SurrealMemoStore {
    db: Surreal<Any>,
}

impl SurrealMemoStore {
    /// Connect to the database at `location` and ensure the schema exists.
    #[instrument(skip_all, fields(location = ?location))]
    pub async fn connect(location: &MemoLocation) -> StorageResult<Self> {
        if let MemoLocation::File(path) = location {
            std::fs::create_dir_all(path).map_err(|e| {
                StorageError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        let url = location.url();
        let db = surrealdb::engine::any::connect(&url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns("accept")
            .use_db("memo")
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!("Memo store connected ({})", url);
        Ok(Self { db })
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect(&MemoLocation::InMemory).await
    }
}

#[async_trait]
impl MemoStore for SurrealMemoStore {
    #[instrument(skip(self), fields(key = %key.short()))]
    async fn get(&self, key: &MemoKey) -> StorageResult<Option<Vec<u8>>> {
        let digest_owned = key.digest().to_string();

        let mut res = self
            .db
            .query("SELECT key, args, value, stored_at FROM memo WHERE key = $key LIMIT 1")
            .bind(("key", digest_owned))
            .await?;

        let rows: Vec<MemoRow> = res.take(0)?;
        match rows.into_iter().next() {
            Some(row) => {
                let bytes = hex::decode(&row.value).map_err(|e| StorageError::Corrupt {
                    key: key.short().to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value), fields(key = %key.short(), bytes = value.len()))]
    async fn put(&self, key: &MemoKey, value: &[u8]) -> StorageResult<()> {
        let row = MemoRow {
            key: key.digest().to_string(),
            args: key.canonical().to_string(),
            value: hex::encode(value),
            stored_at: chrono::Utc::now().to_rfc3339(),
        };

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE memo WHERE key = $key; \
                 CREATE memo CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("key", row.key.clone()))
            .bind(("row", row))
            .await?
            .check()?;

        debug!("Memo entry stored");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key.short()))]
    async fn delete(&self, key: &MemoKey) -> StorageResult<()> {
        let digest_owned = key.digest().to_string();

        self.db
            .query("DELETE memo WHERE key = $key")
            .bind(("key", digest_owned))
            .await?
            .check()?;

        debug!("Memo entry deleted");
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("Memo store handle released");
        Ok(())
    }
}

/// Opens [`SurrealMemoStore`] handles for one [`MemoLocation`].
///
/// The underlying connection is established on first use; every `open`
/// returns a separate client handle onto it.
pub struct SurrealConnector {
    location: MemoLocation,
    db: OnceCell<SurrealMemoStore>,
}

impl SurrealConnector {
    pub fn new(location: MemoLocation) -> Self {
        Self {
            location,
            db: OnceCell::new(),
        }
    }

    pub fn location(&self) -> &MemoLocation {
        &self.location
    }
}

#[async_trait]
impl MemoConnector for SurrealConnector {
    async fn open(&self) -> StorageResult<Arc<dyn MemoStore>> {
        let store = self
            .db
            .get_or_try_init(|| SurrealMemoStore::connect(&self.location))
            .await?;
        Ok(Arc::new(store.clone()))
    }
}
