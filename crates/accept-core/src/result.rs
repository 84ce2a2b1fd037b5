//! Classification of measured configurations.
//!
//! [`ConfigResult::evaluate`] turns the repeated executions of one config
//! into a duration, a speedup and an output error, and classifies the
//! config as good, safe-but-slow or bad. [`triage_results`] then splits a
//! result set into Pareto-optimal, suboptimal and bad entries.

use serde::{Deserialize, Serialize};

use crate::config::RelaxConfig;
use crate::domain::{Execution, ExitStatus, Output};
use crate::scoring::Scorer;
use crate::uncertain::{Uncertain, UncertainError};

/// Default quality bound.
pub const MAX_ERROR: f64 = 0.3;

/// Optimal points closer than this in error are near-duplicates.
const DUP_ERROR_EPS: f64 = 0.001;
/// Optimal points closer than this in speedup are near-duplicates.
const DUP_SPEEDUP_EPS: f64 = 0.01;

/// Outcome of evaluating one config against one baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigResult {
    pub config: RelaxConfig,
    pub duration: Option<Uncertain>,
    pub speedup: Option<Uncertain>,
    pub error: Option<Uncertain>,
    /// Passes both the quality and the speed threshold.
    pub good: bool,
    /// Passes the quality threshold.
    pub safe: bool,
    /// Why the result was classified the way it was.
    pub desc: String,
}

impl ConfigResult {
    fn bad(config: &RelaxConfig, desc: String) -> Self {
        Self {
            config: config.clone(),
            duration: None,
            speedup: None,
            error: None,
            good: false,
            safe: false,
            desc,
        }
    }

    /// Classify the replicas of `config`.
    ///
    /// Timeouts, error exits and scoring failures are bad results, not
    /// errors. Fails only on empty input.
    pub async fn evaluate(
        config: &RelaxConfig,
        executions: &[Execution],
        scorer: &dyn Scorer,
        precise_output: &Output,
        precise_durations: &[f64],
        max_error: f64,
    ) -> Result<Self, UncertainError> {
        if executions.is_empty() {
            return Err(UncertainError::EmptyInput);
        }

        for (i, exec) in executions.iter().enumerate() {
            if exec.status.is_timeout() {
                return Ok(Self::bad(config, format!("replica {} timed out", i)));
            }
        }
        for (i, exec) in executions.iter().enumerate() {
            match &exec.status {
                ExitStatus::Code(0) | ExitStatus::TimedOut => {}
                ExitStatus::Code(code) => {
                    return Ok(Self::bad(
                        config,
                        format!("error status (replica {}): exit code {}", i, code),
                    ))
                }
                ExitStatus::InternalError(msg) => {
                    return Ok(Self::bad(
                        config,
                        format!("error status (replica {}): {}", i, msg),
                    ))
                }
            }
        }

        let mut durations = Vec::with_capacity(executions.len());
        for (i, exec) in executions.iter().enumerate() {
            match exec.duration() {
                Some(d) => durations.push(d),
                None => {
                    return Ok(Self::bad(
                        config,
                        format!("error status (replica {}): no duration recorded", i),
                    ))
                }
            }
        }
        let duration = Uncertain::from_samples(&durations)?;
        let precise = Uncertain::from_samples(precise_durations)?;
        let speedup = precise / duration;

        let mut errors = Vec::with_capacity(executions.len());
        for (i, exec) in executions.iter().enumerate() {
            let scored = match &exec.output {
                Some(out) => scorer.score(precise_output, out).await,
                None => Err(anyhow::anyhow!("no output loaded")),
            };
            match scored {
                Ok(e) => errors.push(e),
                Err(e) => {
                    return Ok(Self {
                        config: config.clone(),
                        duration: Some(duration),
                        speedup: Some(speedup),
                        error: Some(Uncertain::exact(1.0)),
                        good: false,
                        safe: false,
                        desc: format!("scoring failed (replica {}): {:#}", i, e),
                    })
                }
            }
        }
        let error = Uncertain::from_samples(&errors)?;

        let mut res = Self {
            config: config.clone(),
            duration: Some(duration),
            speedup: Some(speedup),
            error: Some(error),
            good: false,
            safe: false,
            desc: String::new(),
        };

        if error > max_error {
            res.desc = format!("large error: {:.1}%", error.value * 100.0);
            return Ok(res);
        }
        res.safe = true;

        if speedup.value <= 1.0 {
            res.desc = format!("no speedup: {} vs. {}", duration, precise);
            return Ok(res);
        }

        res.good = true;
        res.desc = "good".to_string();
        Ok(res)
    }

    /// Point estimate of the speedup (0 when unmeasured).
    pub fn speedup_value(&self) -> f64 {
        self.speedup.map(|s| s.value).unwrap_or(0.0)
    }

    /// Point estimate of the error (1 when unmeasured).
    pub fn error_value(&self) -> f64 {
        self.error.map(|e| e.value).unwrap_or(1.0)
    }
}

/// A result set split by [`triage_results`].
#[derive(Debug, Clone, Default)]
pub struct Triage<'a> {
    /// Pareto-optimal good results, by descending speedup.
    pub optimal: Vec<&'a ConfigResult>,
    pub suboptimal: Vec<&'a ConfigResult>,
    pub bad: Vec<&'a ConfigResult>,
}

impl Triage<'_> {
    pub fn total(&self) -> usize {
        self.optimal.len() + self.suboptimal.len() + self.bad.len()
    }
}

fn dominates(a: &ConfigResult, b: &ConfigResult) -> bool {
    a.error_value() < b.error_value() && a.speedup_value() > b.speedup_value()
}

fn near(a: &ConfigResult, b: &ConfigResult) -> bool {
    (a.error_value() - b.error_value()).abs() < DUP_ERROR_EPS
        && (a.speedup_value() - b.speedup_value()).abs() < DUP_SPEEDUP_EPS
}

/// Split `results` into optimal, suboptimal and bad.
///
/// A good result is suboptimal when another good result has strictly lower
/// error and strictly higher speedup, or when it nearly coincides with a
/// result already accepted as optimal.
pub fn triage_results<'a, I>(results: I) -> Triage<'a>
where
    I: IntoIterator<Item = &'a ConfigResult>,
{
    let mut triage = Triage::default();
    let mut good = Vec::new();
    for res in results {
        if res.good {
            good.push(res);
        } else {
            triage.bad.push(res);
        }
    }

    for (i, &res) in good.iter().enumerate() {
        let dominated = good
            .iter()
            .enumerate()
            .any(|(j, other)| i != j && dominates(other, res));
        let duplicate = triage.optimal.iter().any(|opt| near(opt, res));
        if dominated || duplicate {
            triage.suboptimal.push(res);
        } else {
            triage.optimal.push(res);
        }
    }

    triage
        .optimal
        .sort_by(|a, b| b.speedup_value().total_cmp(&a.speedup_value()));
    triage
}
