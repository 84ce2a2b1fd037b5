//! Structured events for scheduler and evaluation lifecycles.
//!
//! - [`eval_span`] tags everything logged during one program's evaluation
//!   with its directory. Attach it with `tracing::Instrument`; the
//!   scheduler carries the submitting span into pool workers.
//! - `emit_*` functions log named events at `info!`/`debug!`

use tracing::{debug, info, Span};

/// Span for one program's evaluation.
///
/// ```ignore
/// use tracing::Instrument;
/// evaluate(dir).instrument(eval_span("apps/sobel")).await;
/// // every event inside carries app = "apps/sobel"
/// ```
pub fn eval_span(app: &str) -> Span {
    tracing::info_span!("accept.eval", app = %app)
}

/// A job was dispatched.
pub fn emit_job_submitted(job: &str, key: &str, mode: &str) {
    debug!(event = "job.submitted", job = %job, key = %key, mode = %mode);
}

/// A submit was satisfied from the memo store.
pub fn emit_job_cache_hit(job: &str, key: &str) {
    debug!(event = "job.cache_hit", job = %job, key = %key);
}

/// A job finished, successfully or not.
pub fn emit_job_completed(job: &str, key: &str, ok: bool) {
    debug!(event = "job.completed", job = %job, key = %key, ok = ok);
}

/// The evaluation state machine moved to a new phase.
pub fn emit_phase_entered(phase: &str, test: bool) {
    info!(event = "eval.phase_entered", phase = %phase, test = test);
}

/// A batch of configurations was evaluated.
pub fn emit_configs_evaluated(count: usize, good: usize, test: bool) {
    info!(event = "eval.configs_evaluated", count = count, good = good, test = test);
}

/// A result set was split by triage.
pub fn emit_results_triaged(optimal: usize, suboptimal: usize, bad: usize) {
    info!(
        event = "eval.results_triaged",
        optimal = optimal,
        suboptimal = suboptimal,
        bad = bad,
    );
}

/// One generation of parameter tuning finished.
pub fn emit_generation_finished(generation: usize, candidates: usize, survivors: usize) {
    info!(
        event = "eval.generation_finished",
        generation = generation,
        candidates = candidates,
        survivors = survivors,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    use tracing::Instrument;
    use tracing_subscriber::util::SubscriberInitExt;

    #[tokio::test]
    async fn eval_span_covers_instrumented_future() {
        let _default = tracing_subscriber::registry().set_default();
        let name = async {
            emit_phase_entered("base_sweep", false);
            Span::current().metadata().map(|m| m.name())
        }
        .instrument(eval_span("apps/sobel"))
        .await;
        assert_eq!(name, Some("accept.eval"));
        assert!(Span::current().metadata().is_none());
    }
}
