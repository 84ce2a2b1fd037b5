//! The search for one program.
//!
//! [`Evaluation`] sequences the phases of a search over one program
//! directory:
//!
//! ```text
//! Created -> BaselineSetup -> BaseSweep -> GenerationalTuning
//!         -> CompositeEvaluation -> Done
//! ```
//!
//! All work goes through the session's [`JobScheduler`]: each phase
//! submits every job it needs before collecting any of them, so a pool
//! scheduler runs them in parallel while this code stays sequential.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::composer::{bce_greedy, Component};
use crate::config::{cap_config, increase_config, permute_config, RelaxConfig, SiteId};
use crate::domain::{AcceptError, Execution, ExitStatus, Output, Result};
use crate::execute::{BuildAndExecute, Harness};
use crate::obs;
use crate::result::{triage_results, ConfigResult, MAX_ERROR};
use crate::scheduler::JobScheduler;

/// Search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSettings {
    /// Executions per configuration.
    pub reps: u32,
    /// Quality bound for safe results.
    pub max_error: f64,
    /// Approximate runs time out after this multiple of the precise run.
    pub timeout_factor: f64,
    /// Upper bound on tuning generations.
    pub max_generations: usize,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            reps: 1,
            max_error: MAX_ERROR,
            timeout_factor: 3.0,
            max_generations: 10,
        }
    }
}

impl EvalSettings {
    /// One repetition per configuration.
    pub fn local() -> Self {
        Self::default()
    }

    /// Five repetitions per configuration.
    pub fn cluster() -> Self {
        Self {
            reps: 5,
            ..Self::default()
        }
    }

    pub fn with_reps(mut self, reps: u32) -> Self {
        self.reps = reps.max(1);
        self
    }
}

/// Phase of an [`Evaluation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalState {
    Created,
    BaselineSetup,
    BaseSweep,
    GenerationalTuning,
    CompositeEvaluation,
    Done,
}

impl EvalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalState::Created => "created",
            EvalState::BaselineSetup => "baseline_setup",
            EvalState::BaseSweep => "base_sweep",
            EvalState::GenerationalTuning => "generational_tuning",
            EvalState::CompositeEvaluation => "composite_evaluation",
            EvalState::Done => "done",
        }
    }
}

/// Precise-run reference for one mode (train or test).
#[derive(Debug, Clone)]
struct Baseline {
    output: Output,
    elapsed: f64,
    /// Durations of all precise replicas, collected on first use.
    durations: Option<Vec<f64>>,
}

/// Search state for one program directory.
pub struct Evaluation<'s> {
    dir: PathBuf,
    scheduler: &'s JobScheduler,
    harness: Arc<Harness>,
    settings: EvalSettings,
    state: EvalState,
    train: Option<Baseline>,
    test: Option<Baseline>,
    base_config: Option<RelaxConfig>,
    base_configs: Vec<RelaxConfig>,
    descs: BTreeMap<SiteId, String>,
    results: BTreeMap<RelaxConfig, ConfigResult>,
}

impl<'s> Evaluation<'s> {
    pub fn new(
        dir: &Path,
        scheduler: &'s JobScheduler,
        harness: Arc<Harness>,
        settings: EvalSettings,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            scheduler,
            harness,
            settings,
            state: EvalState::Created,
            train: None,
            test: None,
            base_config: None,
            base_configs: Vec::new(),
            descs: BTreeMap::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> EvalState {
        self.state
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    /// Site list discovered by the precise build.
    pub fn base_config(&self) -> Option<&RelaxConfig> {
        self.base_config.as_ref()
    }

    /// Single-site variants of the base config.
    pub fn base_configs(&self) -> &[RelaxConfig] {
        &self.base_configs
    }

    /// Human-readable site descriptions.
    pub fn descs(&self) -> &BTreeMap<SiteId, String> {
        &self.descs
    }

    /// Every training result evaluated so far, one per config.
    pub fn results(&self) -> &BTreeMap<RelaxConfig, ConfigResult> {
        &self.results
    }

    /// Precise output of the training baseline.
    pub fn precise_output(&self) -> Option<&Output> {
        self.train.as_ref().map(|b| &b.output)
    }

    /// Wall-clock seconds of the training baseline.
    pub fn precise_elapsed(&self) -> Option<f64> {
        self.train.as_ref().map(|b| b.elapsed)
    }

    fn enter(&mut self, state: EvalState, test: bool) {
        self.state = state;
        obs::emit_phase_entered(state.as_str(), test);
    }

    fn job(&self, config: Option<RelaxConfig>, rep: u32, test: bool) -> BuildAndExecute {
        BuildAndExecute::new(Arc::clone(&self.harness), &self.dir, config, rep, test)
    }

    fn baseline(&self, test: bool) -> Option<&Baseline> {
        if test {
            self.test.as_ref()
        } else {
            self.train.as_ref()
        }
    }

    fn baseline_mut(&mut self, test: bool) -> Option<&mut Baseline> {
        if test {
            self.test.as_mut()
        } else {
            self.train.as_mut()
        }
    }

    /// Run the precise baseline for one mode. Only the first call per mode
    /// does any work.
    pub async fn setup(&mut self, test: bool) -> Result<()> {
        if self.baseline(test).is_some() {
            return Ok(());
        }

        for rep in 0..self.settings.reps {
            self.scheduler.submit(self.job(None, rep, test)).await?;
        }
        let first: Execution = self.scheduler.get(&self.job(None, 0, test)).await?;

        let failure = match &first.status {
            ExitStatus::Code(0) => None,
            ExitStatus::Code(code) => Some(format!("exit code {}", code)),
            ExitStatus::TimedOut => Some("timed out".to_string()),
            ExitStatus::InternalError(msg) => Some(msg.clone()),
        };
        if let Some(reason) = failure {
            return Err(AcceptError::PreciseExecutionFailed {
                reason,
                log: first.log,
            });
        }

        let (Some(output), Some(elapsed)) = (first.output.clone(), first.elapsed) else {
            return Err(AcceptError::PreciseExecutionFailed {
                reason: "no output or timing recorded".to_string(),
                log: first.log,
            });
        };

        if !test {
            let Some(base) = first.config.clone() else {
                return Err(AcceptError::PreciseExecutionFailed {
                    reason: "precise build reported no relaxation sites".to_string(),
                    log: first.log,
                });
            };
            self.base_configs = permute_config(&base);
            self.base_config = Some(base);
            self.descs = first.descs.clone().unwrap_or_default();
            info!(
                sites = self.base_configs.len(),
                elapsed, "Precise baseline ready"
            );
        }

        let baseline = Baseline {
            output,
            elapsed,
            durations: None,
        };
        if test {
            self.test = Some(baseline);
        } else {
            self.train = Some(baseline);
        }
        Ok(())
    }

    /// Durations of every precise replica for one mode.
    async fn precise_durations(&mut self, test: bool) -> Result<Vec<f64>> {
        if let Some(durations) = self.baseline(test).and_then(|b| b.durations.clone()) {
            return Ok(durations);
        }

        let mut durations = Vec::with_capacity(self.settings.reps as usize);
        for rep in 0..self.settings.reps {
            let exec: Execution = self.scheduler.get(&self.job(None, rep, test)).await?;
            match exec.duration() {
                Some(d) if exec.succeeded() => durations.push(d),
                _ => {
                    return Err(AcceptError::PreciseExecutionFailed {
                        reason: format!("precise replica {}: {}", rep, exec.status),
                        log: exec.log,
                    })
                }
            }
        }
        if let Some(baseline) = self.baseline_mut(test) {
            baseline.durations = Some(durations.clone());
        }
        Ok(durations)
    }

    /// Measure `configs` and classify each one.
    ///
    /// Training results are recorded (replacing earlier results for the
    /// same config); test results are only returned.
    pub async fn run_approx(
        &mut self,
        configs: &[RelaxConfig],
        test: bool,
    ) -> Result<Vec<ConfigResult>> {
        self.setup(test).await?;
        let Some(baseline) = self.baseline(test).cloned() else {
            return Ok(Vec::new());
        };
        let timeout = Duration::from_secs_f64(baseline.elapsed * self.settings.timeout_factor);

        for config in configs {
            for rep in 0..self.settings.reps {
                let job = self.job(Some(config.clone()), rep, test).with_timeout(Some(timeout));
                self.scheduler.submit(job).await?;
            }
        }

        let precise = self.precise_durations(test).await?;

        let mut out = Vec::with_capacity(configs.len());
        for config in configs {
            let mut execs = Vec::with_capacity(self.settings.reps as usize);
            for rep in 0..self.settings.reps {
                execs.push(
                    self.scheduler
                        .get(&self.job(Some(config.clone()), rep, test))
                        .await?,
                );
            }
            let res = ConfigResult::evaluate(
                config,
                &execs,
                self.harness.scorer.as_ref(),
                &baseline.output,
                &precise,
                self.settings.max_error,
            )
            .await?;
            debug!(config = %config, desc = %res.desc, "Config evaluated");
            if !test {
                self.results.insert(config.clone(), res.clone());
            }
            out.push(res);
        }

        obs::emit_configs_evaluated(out.len(), out.iter().filter(|r| r.good).count(), test);
        Ok(out)
    }

    /// Generational hill-climb from the safe members of `base_results`.
    ///
    /// Each generation raises every survivor's relaxed parameters by one
    /// (capped per site kind). A child survives if it is safe and not
    /// measurably slower than its parent. Returns all survivors of all
    /// generations, generation 0 included.
    pub async fn parameter_search(
        &mut self,
        base_results: &[ConfigResult],
    ) -> Result<Vec<ConfigResult>> {
        let mut survivors: Vec<ConfigResult> =
            base_results.iter().filter(|r| r.safe).cloned().collect();
        let mut tuned = survivors.clone();

        for generation in 1..=self.settings.max_generations {
            if survivors.is_empty() {
                break;
            }

            let mut seen = BTreeSet::new();
            let mut children: Vec<(ConfigResult, RelaxConfig)> = Vec::new();
            for parent in &survivors {
                let child = cap_config(&increase_config(&parent.config, 1));
                if child == parent.config || !seen.insert(child.clone()) {
                    continue;
                }
                children.push((parent.clone(), child));
            }
            if children.is_empty() {
                obs::emit_generation_finished(generation, 0, 0);
                break;
            }

            let configs: Vec<RelaxConfig> = children.iter().map(|(_, c)| c.clone()).collect();
            let results = self.run_approx(&configs, false).await?;

            survivors = children
                .iter()
                .zip(results)
                .filter(|((parent, _), child)| child.safe && !slower(child, parent))
                .map(|(_, child)| child)
                .collect();
            obs::emit_generation_finished(generation, configs.len(), survivors.len());
            tuned.extend(survivors.iter().cloned());
        }

        Ok(tuned)
    }

    /// Measure greedy composites of the optimal members of `tuned`.
    pub async fn evaluate_composites(
        &mut self,
        tuned: &[ConfigResult],
    ) -> Result<Vec<ConfigResult>> {
        let triage = triage_results(tuned);
        obs::emit_results_triaged(
            triage.optimal.len(),
            triage.suboptimal.len(),
            triage.bad.len(),
        );
        let components: Vec<Component> =
            triage.optimal.iter().map(|r| Component::from(*r)).collect();

        let mut candidates = bce_greedy(&components, self.settings.max_error)?;
        let mut seen = BTreeSet::new();
        candidates.retain(|c| seen.insert(c.clone()));
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        self.run_approx(&candidates, false).await
    }

    /// The full search. Uses the single-site variants of the base config
    /// unless `base_configs` is given. Returns the union of the sweep,
    /// tuning and composite results, later phases winning per config.
    pub async fn run(&mut self, base_configs: Option<Vec<RelaxConfig>>) -> Result<Vec<ConfigResult>> {
        if self.train.is_none() {
            self.enter(EvalState::BaselineSetup, false);
            self.setup(false).await?;
        }

        self.enter(EvalState::BaseSweep, false);
        let base = base_configs.unwrap_or_else(|| self.base_configs.clone());
        let base_results = self.run_approx(&base, false).await?;

        self.enter(EvalState::GenerationalTuning, false);
        let tuned = self.parameter_search(&base_results).await?;

        self.enter(EvalState::CompositeEvaluation, false);
        let composites = self.evaluate_composites(&tuned).await?;

        self.enter(EvalState::Done, false);

        let mut merged: BTreeMap<RelaxConfig, ConfigResult> = BTreeMap::new();
        for res in base_results.into_iter().chain(tuned).chain(composites) {
            merged.insert(res.config.clone(), res);
        }
        Ok(merged.into_values().collect())
    }

    /// Re-measure `configs` against the held-out test input.
    pub async fn test_runs(&mut self, configs: &[RelaxConfig]) -> Result<Vec<ConfigResult>> {
        if self.test.is_none() {
            self.enter(EvalState::BaselineSetup, true);
            self.setup(true).await?;
        }
        self.run_approx(configs, true).await
    }
}

/// True when `child` is measurably slower than `parent`.
fn slower(child: &ConfigResult, parent: &ConfigResult) -> bool {
    match (child.duration, parent.duration) {
        (Some(c), Some(p)) => c > p,
        _ => true,
    }
}
