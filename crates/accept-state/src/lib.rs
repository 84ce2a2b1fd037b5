//! Accept-State: persistent memoization for ACCEPT jobs
//!
//! This crate is the persistence layer underneath the job scheduler. Every
//! build-and-run job is identified by a [`MemoKey`] derived from a stable
//! function identity plus its positional arguments; the serialized result
//! of the job is stored under that key and reused across sessions.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: deterministic keys, durable values, cheap invalidation.
//!
//! ## Key Components
//!
//! - `MemoKey`: canonical encoding of `(function identity, positional args)`
//! - `MemoStore`: get/put/delete of serialized results
//! - `MemoConnector`: hands out independent store handles (one per thread of use)
//! - `SurrealMemoStore`: SurrealDB-backed store (`surrealkv://` file or `mem://`)

mod error;
pub mod fakes;
pub mod key;
mod migrations;
pub mod storage_traits;
pub mod surreal_memo;

pub use error::StorageError;
pub use key::MemoKey;
pub use storage_traits::{MemoConnector, MemoStore, StorageResult};
pub use surreal_memo::{MemoLocation, SurrealConnector, SurrealMemoStore};
