//! The unit of memoized work.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use accept_state::MemoKey;

use super::error::SchedulerResult;

/// A memoizable computation.
///
/// The memo key is `(NAME, args())`. Anything the job carries besides its
/// key arguments (timeouts, collaborator handles, ...) is a tuning
/// input: two jobs that differ only there share one cache entry.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Serialized into the memo store.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Stable identity of the computation.
    const NAME: &'static str;

    /// Positional arguments participating in the key.
    type Args: Serialize;

    fn args(&self) -> Self::Args;

    async fn run(&self) -> anyhow::Result<Self::Output>;
}

/// Memo key for `job`.
pub fn job_key<J: Job>(job: &J) -> SchedulerResult<MemoKey> {
    Ok(MemoKey::new(J::NAME, &job.args())?)
}
