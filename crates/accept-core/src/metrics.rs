//! Global atomic counters for scheduler activity.
//!
//! Counters are bumped at the call site. Call [`Metrics::flush`] to emit
//! the current values as one `tracing::info!` event, e.g. at the end of an
//! experiment.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free job counters.
pub struct Metrics {
    jobs_submitted: AtomicU64,
    cache_hits: AtomicU64,
    jobs_completed: AtomicU64,
    job_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            job_failures: AtomicU64::new(0),
        }
    }

    /// A job was dispatched (not served from the memo store).
    pub fn inc_jobs_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_submitted", "counter incremented");
    }

    /// A submit found the result already memoized.
    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    pub fn inc_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_completed", "counter incremented");
    }

    pub fn inc_job_failures(&self) {
        self.job_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "job_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            jobs_submitted = self.jobs_submitted(),
            cache_hits = self.cache_hits(),
            jobs_completed = self.jobs_completed(),
            job_failures = self.job_failures(),
        );
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn job_failures(&self) -> u64 {
        self.job_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.jobs_submitted.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.jobs_completed.store(0, Ordering::Relaxed);
        self.job_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_jobs_submitted();
        m.inc_jobs_submitted();
        m.inc_cache_hits();
        m.inc_jobs_completed();
        m.inc_job_failures();
        assert_eq!(m.jobs_submitted(), 2);
        assert_eq!(m.cache_hits(), 1);
        assert_eq!(m.jobs_completed(), 1);
        assert_eq!(m.job_failures(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_jobs_submitted();
        m.inc_cache_hits();
        m.reset();
        assert_eq!(m.jobs_submitted(), 0);
        assert_eq!(m.cache_hits(), 0);
    }
}
