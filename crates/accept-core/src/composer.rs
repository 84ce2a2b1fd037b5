//! Composite configuration candidates.
//!
//! Given measured single configurations, estimate what combining them
//! would do and propose composites worth measuring:
//!
//! - [`best_combined_configs`]: exhaustive search over subsets, keeping
//!   the Pareto front of estimated `(speedup, error)`
//! - [`bce_greedy`]: knapsack-style greedy selection under an error budget
//!
//! Combined speedup is estimated with the reciprocal-sum rule
//! `(sum(1/s_i) - (n - 1))^-1`; combined error is the plain sum.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{combine_configs, config_subsumes, ConfigError, RelaxConfig};
use crate::result::ConfigResult;

/// Largest input the subset search enumerates exhaustively.
pub const MAX_POWERSET_COMPONENTS: usize = 16;

/// Floor for the error term of the greedy value ratio.
const MIN_ERROR: f64 = 0.001;

/// A config with point estimates of its speedup and error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub config: RelaxConfig,
    pub speedup: f64,
    pub error: f64,
}

impl Component {
    pub fn new(config: RelaxConfig, speedup: f64, error: f64) -> Self {
        Self {
            config,
            speedup,
            error,
        }
    }

    /// Speed gained per unit of error.
    pub fn value(&self) -> f64 {
        (1.0 - 1.0 / self.speedup) / self.error.max(MIN_ERROR)
    }
}

impl From<&ConfigResult> for Component {
    fn from(res: &ConfigResult) -> Self {
        Self::new(res.config.clone(), res.speedup_value(), res.error_value())
    }
}

/// Estimated speedup of running all `speedups` together.
pub fn combined_speedup(speedups: &[f64]) -> f64 {
    let n = speedups.len() as f64;
    let denom = speedups.iter().map(|s| 1.0 / s).sum::<f64>() - (n - 1.0);
    if denom <= 0.0 {
        0.0
    } else {
        1.0 / denom
    }
}

fn by_value_desc(components: &[Component]) -> Vec<&Component> {
    let mut sorted: Vec<&Component> = components.iter().collect();
    sorted.sort_by(|a, b| b.value().total_cmp(&a.value()));
    sorted
}

/// Pareto-optimal composites of two or more `components` whose estimated
/// error stays within `max_error`, by descending estimated speedup. Each
/// config appears once, with its best estimate.
///
/// Only the [`MAX_POWERSET_COMPONENTS`] most valuable components (by
/// [`Component::value`]) are combined; the rest are dropped with a warning.
pub fn best_combined_configs(
    components: &[Component],
    max_error: f64,
) -> Result<Vec<Component>, ConfigError> {
    let mut pool = by_value_desc(components);
    if pool.len() > MAX_POWERSET_COMPONENTS {
        warn!(
            components = pool.len(),
            kept = MAX_POWERSET_COMPONENTS,
            "Too many components for exhaustive combination; keeping the most valuable"
        );
        pool.truncate(MAX_POWERSET_COMPONENTS);
    }

    let n = pool.len();
    let mut candidates: Vec<Component> = Vec::new();
    for mask in 1u32..(1u32 << n) {
        if mask.count_ones() < 2 {
            continue;
        }
        let members: Vec<&Component> = (0..n)
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| pool[i])
            .collect();

        let error: f64 = members.iter().map(|c| c.error).sum();
        if error > max_error {
            continue;
        }

        let Some(config) = combine_configs(members.iter().map(|c| &c.config))? else {
            continue;
        };
        if members.iter().any(|c| c.config == config) {
            continue;
        }

        let speedups: Vec<f64> = members.iter().map(|c| c.speedup).collect();
        candidates.push(Component::new(config, combined_speedup(&speedups), error));
    }

    let mut front: Vec<Component> = candidates
        .iter()
        .filter(|c| {
            !candidates
                .iter()
                .any(|o| o.speedup >= c.speedup && o.error < c.error)
        })
        .cloned()
        .collect();
    front.sort_by(|a, b| b.speedup.total_cmp(&a.speedup));
    let mut seen = BTreeSet::new();
    front.retain(|c| seen.insert(c.config.clone()));
    Ok(front)
}

/// Greedy composite selection.
///
/// Components are taken in order of [`Component::value`] while the summed
/// error stays within `max_error`; a component already covered by the
/// running composite is skipped. Returns the running composite after each
/// accepted component, so the last entry is the most aggressive.
pub fn bce_greedy(
    components: &[Component],
    max_error: f64,
) -> Result<Vec<RelaxConfig>, ConfigError> {
    let mut composites = Vec::new();
    let mut current: Option<RelaxConfig> = None;
    let mut cur_error = 0.0;

    for comp in by_value_desc(components) {
        if let Some(cur) = &current {
            if config_subsumes(cur, &comp.config)? {
                continue;
            }
        }
        if cur_error + comp.error > max_error {
            continue;
        }
        cur_error += comp.error;
        let next = match &current {
            Some(cur) => combine_configs([cur, &comp.config])?,
            None => Some(comp.config.clone()),
        };
        if let Some(next) = next {
            composites.push(next.clone());
            current = Some(next);
        }
    }
    Ok(composites)
}
