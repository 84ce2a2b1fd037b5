//! Memoizing job scheduler.
//!
//! [`JobScheduler`] wraps a [`MemoStore`] with a `submit`/`get` interface:
//!
//! - `submit(job)` is a no-op when the job's result is already memoized
//!   (unless `force` is set) or the same key is already in flight.
//!   Otherwise the job runs inline ([`Dispatch::Local`]) or is handed to a
//!   bounded worker pool ([`Dispatch::Pool`]) and `submit` returns at once.
//! - `get(job)` waits until no job for the key is in flight, then returns
//!   the memoized value, the job's failure, or `NotFound`.
//!
//! Callers fan out by submitting many jobs before collecting any of them.
//!
//! A submit claims its key under the lock before touching the store, so
//! concurrent submits of one key run the job at most once.
//!
//! In pool mode workers never touch the store. They send their outcome to
//! a single completion task that owns its own store handle, writes the
//! value, clears the in-flight entry under the lock and wakes all waiters.

mod error;
mod job;

pub use error::{SchedulerError, SchedulerResult};
pub use job::{job_key, Job};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;

use accept_state::{MemoConnector, MemoKey, MemoStore};

use crate::metrics::METRICS;
use crate::obs;

/// Where submitted jobs run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Dispatch {
    /// Run inside `submit`, on the caller's task.
    Local,
    /// Run on up to `workers` concurrent tasks.
    Pool { workers: usize },
}

impl Dispatch {
    fn label(&self) -> &'static str {
        match self {
            Dispatch::Local => "local",
            Dispatch::Pool { .. } => "pool",
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerOptions {
    pub dispatch: Dispatch,
    /// Discard memoized results and recompute on every submit.
    pub force: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            dispatch: Dispatch::Local,
            force: false,
        }
    }
}

impl SchedulerOptions {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn pool(workers: usize) -> Self {
        Self {
            dispatch: Dispatch::Pool { workers },
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Default)]
struct InFlight {
    /// Claimed keys: submits still checking the store, local runs and
    /// outstanding pool jobs.
    jobs: HashMap<Uuid, MemoKey>,
    /// Failure of the most recent job for a key, until it is resubmitted.
    failures: HashMap<MemoKey, String>,
}

impl InFlight {
    fn is_pending(&self, key: &MemoKey) -> bool {
        self.jobs.values().any(|k| k == key)
    }
}

struct Shared {
    state: Mutex<InFlight>,
    done: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, InFlight> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Completion {
    id: Uuid,
    name: &'static str,
    outcome: Result<Vec<u8>, String>,
}

struct Pool {
    permits: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Completion>,
    workers: Mutex<JoinSet<()>>,
    completion: JoinHandle<()>,
}

impl Pool {
    fn abort(&self) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
        self.completion.abort();
    }
}

/// An in-flight entry owned by a `submit` call. Released on drop unless
/// handed to a pool worker, whose completion releases it instead.
struct Claim<'a> {
    shared: &'a Shared,
    id: Uuid,
    armed: bool,
}

impl Claim<'_> {
    fn hand_off(mut self) -> Uuid {
        self.armed = false;
        self.id
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().jobs.remove(&self.id);
            self.shared.done.notify_waiters();
        }
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A scheduler session. Create with [`JobScheduler::enter`] and end with
/// [`JobScheduler::close`]; dropping an open session aborts outstanding
/// work without waiting.
pub struct JobScheduler {
    options: SchedulerOptions,
    store: Arc<dyn MemoStore>,
    shared: Arc<Shared>,
    pool: Option<Pool>,
}

impl JobScheduler {
    /// Open the memo store and, in pool mode, start the completion task on
    /// a second store handle.
    pub async fn enter(
        connector: &dyn MemoConnector,
        options: SchedulerOptions,
    ) -> SchedulerResult<Self> {
        let store = connector.open().await?;
        let shared = Arc::new(Shared {
            state: Mutex::new(InFlight::default()),
            done: Notify::new(),
        });

        let pool = match options.dispatch {
            Dispatch::Local => None,
            Dispatch::Pool { workers } => {
                let completion_store = connector.open().await?;
                let (tx, rx) = mpsc::unbounded_channel();
                let completion =
                    tokio::spawn(completion_loop(rx, completion_store, Arc::clone(&shared)));
                Some(Pool {
                    permits: Arc::new(Semaphore::new(workers.max(1))),
                    tx,
                    workers: Mutex::new(JoinSet::new()),
                    completion,
                })
            }
        };

        info!(
            mode = options.dispatch.label(),
            force = options.force,
            "Scheduler session opened"
        );
        Ok(Self {
            options,
            store,
            shared,
            pool,
        })
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Number of claimed keys not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    /// Make sure `job`'s result is (or will be) memoized.
    pub async fn submit<J: Job>(&self, job: J) -> SchedulerResult<()> {
        let key = job_key(&job)?;

        let Some(claim) = self.claim(&key) else {
            debug!(job = J::NAME, key = %key.short(), "Job already in flight");
            return Ok(());
        };

        if self.options.force {
            self.store.delete(&key).await?;
        } else if self.store.contains(&key).await? {
            METRICS.inc_cache_hits();
            obs::emit_job_cache_hit(J::NAME, key.short());
            return Ok(());
        }

        METRICS.inc_jobs_submitted();
        obs::emit_job_submitted(J::NAME, key.short(), self.options.dispatch.label());

        match &self.pool {
            None => self.run_local(job, key).await,
            Some(pool) => {
                self.dispatch(pool, job, key, claim.hand_off());
                Ok(())
            }
        }
    }

    /// Mark `key` in flight unless it already is. Clears any failure left
    /// by a previous job for the key.
    fn claim(&self, key: &MemoKey) -> Option<Claim<'_>> {
        let mut state = self.shared.lock();
        if state.is_pending(key) {
            return None;
        }
        state.failures.remove(key);
        let id = Uuid::new_v4();
        state.jobs.insert(id, key.clone());
        Some(Claim {
            shared: &self.shared,
            id,
            armed: true,
        })
    }

    async fn run_local<J: Job>(&self, job: J, key: MemoKey) -> SchedulerResult<()> {
        let value = job.run().await.map_err(|e| {
            METRICS.inc_job_failures();
            obs::emit_job_completed(J::NAME, key.short(), false);
            SchedulerError::JobFailed {
                key: key.to_string(),
                message: format!("{:#}", e),
            }
        })?;
        let bytes = serde_json::to_vec(&value)?;
        self.store.put(&key, &bytes).await?;
        METRICS.inc_jobs_completed();
        obs::emit_job_completed(J::NAME, key.short(), true);
        Ok(())
    }

    fn dispatch<J: Job>(&self, pool: &Pool, job: J, key: MemoKey, id: Uuid) {
        let permits = Arc::clone(&pool.permits);
        let tx = pool.tx.clone();
        let short = key.short().to_string();
        let span = Span::current();
        let job_span = span.clone();
        let worker = async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => {
                    let inner = tokio::spawn(
                        async move {
                            let value = job.run().await?;
                            Ok::<_, anyhow::Error>(serde_json::to_vec(&value)?)
                        }
                        .instrument(job_span),
                    );
                    let _guard = AbortOnDrop(inner.abort_handle());
                    match inner.await {
                        Ok(Ok(bytes)) => Ok(bytes),
                        Ok(Err(e)) => Err(format!("{:#}", e)),
                        Err(e) if e.is_panic() => Err(format!("worker panicked: {}", e)),
                        Err(e) => Err(e.to_string()),
                    }
                }
                Err(_) => Err(SchedulerError::Closed.to_string()),
            };
            debug!(key = %short, ok = outcome.is_ok(), "Worker finished");
            let _ = tx.send(Completion {
                id,
                name: J::NAME,
                outcome,
            });
        };

        let mut workers = pool.workers.lock().unwrap_or_else(PoisonError::into_inner);
        while workers.try_join_next().is_some() {}
        workers.spawn(worker.instrument(span));
    }

    /// Wait for `job`'s key to resolve and return its memoized value.
    ///
    /// A failed pool job is reported to every `get` of its key until the
    /// key is submitted again.
    pub async fn get<J: Job>(&self, job: &J) -> SchedulerResult<J::Output> {
        let key = job_key(job)?;

        loop {
            let notified = self.shared.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.lock();
                if let Some(message) = state.failures.get(&key) {
                    return Err(SchedulerError::JobFailed {
                        key: key.to_string(),
                        message: message.clone(),
                    });
                }
                if !state.is_pending(&key) {
                    break;
                }
            }
            notified.await;
        }

        match self.store.get(&key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(SchedulerError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.shared.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.lock().jobs.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// End the session. Waits for outstanding jobs unless the caller is
    /// unwinding from an error; the store is closed either way.
    pub async fn close(mut self, propagating_error: bool) -> SchedulerResult<()> {
        if let Some(pool) = self.pool.take() {
            if propagating_error {
                let abandoned = self.shared.lock().jobs.len();
                if abandoned > 0 {
                    warn!(abandoned, "Closing scheduler with jobs in flight");
                }
                pool.abort();
            } else {
                self.wait_idle().await;
                let Pool {
                    tx, completion, ..
                } = pool;
                drop(tx);
                if let Err(e) = completion.await {
                    warn!(error = %e, "Completion task ended abnormally");
                }
            }
        }

        self.store.close().await?;
        info!("Scheduler session closed");
        Ok(())
    }

    /// Close the session according to `outcome` and pass it through.
    pub async fn close_with<T, E>(self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<SchedulerError>,
    {
        let closed = self.close(outcome.is_err()).await;
        let value = outcome?;
        closed?;
        Ok(value)
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        if let Some(pool) = &self.pool {
            pool.abort();
        }
    }
}

async fn completion_loop(
    mut rx: mpsc::UnboundedReceiver<Completion>,
    store: Arc<dyn MemoStore>,
    shared: Arc<Shared>,
) {
    while let Some(Completion { id, name, outcome }) = rx.recv().await {
        let Some(key) = shared.lock().jobs.get(&id).cloned() else {
            warn!(job_id = %id, "Completion for unknown job");
            continue;
        };

        // Write before clearing the in-flight entry so a waiter that wakes
        // always finds the value.
        let outcome = match outcome {
            Ok(bytes) => store
                .put(&key, &bytes)
                .await
                .map_err(|e| format!("storing result failed: {}", e)),
            Err(message) => Err(message),
        };

        let ok = outcome.is_ok();
        {
            let mut state = shared.lock();
            state.jobs.remove(&id);
            if let Err(message) = outcome {
                state.failures.insert(key.clone(), message);
            }
        }
        shared.done.notify_waiters();

        if ok {
            METRICS.inc_jobs_completed();
        } else {
            METRICS.inc_job_failures();
        }
        obs::emit_job_completed(name, key.short(), ok);
    }

    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close completion store handle");
    }
}
