//! SurrealDB schema initialization for the memo table

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Initialize the `memo` table.
///
/// Schema:
/// ```text
/// TABLE memo {
///   key:        STRING (sha-256 of the canonical key, unique)
///   args:       STRING (canonical key text, kept for inspection)
///   value:      STRING (hex-encoded serialized result)
///   stored_at:  STRING (RFC 3339)
/// }
/// ```
///
/// Safe to call on every connection.
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing memo table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memo SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS key ON memo TYPE string;
        DEFINE FIELD IF NOT EXISTS args ON memo TYPE string;
        DEFINE FIELD IF NOT EXISTS value ON memo TYPE string;
        DEFINE FIELD IF NOT EXISTS stored_at ON memo TYPE string;
        DEFINE INDEX IF NOT EXISTS idx_memo_key ON memo FIELDS key UNIQUE;
    "#;

    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;

    debug!("Memo table ready");
    Ok(())
}
