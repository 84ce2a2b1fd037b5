//! Properties of result triage and greedy composition.

use accept_core::composer::{bce_greedy, Component};
use accept_core::config::{config_subsumes, RelaxConfig, SiteId};
use accept_core::result::{triage_results, ConfigResult};
use accept_core::uncertain::Uncertain;
use proptest::prelude::*;

fn result(i: usize, speedup: f64, error: f64, good: bool) -> ConfigResult {
    let site = format!("loop:r{}", i);
    ConfigResult {
        config: RelaxConfig::from_pairs([(site.as_str(), 1)]),
        duration: Some(Uncertain::exact(10.0 / speedup)),
        speedup: Some(Uncertain::exact(speedup)),
        error: Some(Uncertain::exact(error)),
        good,
        safe: good,
        desc: if good { "good".into() } else { "large error".into() },
    }
}

fn result_sets() -> impl Strategy<Value = Vec<ConfigResult>> {
    proptest::collection::vec((0.5f64..4.0, 0.0f64..0.5, any::<bool>()), 0..24).prop_map(|pts| {
        pts.into_iter()
            .enumerate()
            .map(|(i, (s, e, good))| result(i, s, e, good))
            .collect()
    })
}

fn dominates(a: &ConfigResult, b: &ConfigResult) -> bool {
    a.error_value() < b.error_value() && a.speedup_value() > b.speedup_value()
}

fn near(a: &ConfigResult, b: &ConfigResult) -> bool {
    (a.error_value() - b.error_value()).abs() < 0.001
        && (a.speedup_value() - b.speedup_value()).abs() < 0.01
}

/// One component per site, each relaxing only its own site.
fn single_site_components() -> impl Strategy<Value = Vec<Component>> {
    proptest::collection::vec((1.01f64..4.0, 0.0f64..0.2), 1..8).prop_map(|pts| {
        let n = pts.len();
        pts.into_iter()
            .enumerate()
            .map(|(i, (s, e))| {
                let sites = (0..n)
                    .map(|j| (SiteId::new(format!("loop:s{}", j)), u32::from(i == j)))
                    .collect();
                Component::new(RelaxConfig::new(sites), s, e)
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn triage_partitions_its_input(results in result_sets()) {
        let t = triage_results(&results);
        prop_assert_eq!(t.total(), results.len());
        prop_assert!(t.bad.iter().all(|r| !r.good));
        prop_assert!(t.optimal.iter().chain(&t.suboptimal).all(|r| r.good));
    }

    #[test]
    fn optimal_points_are_not_dominated(results in result_sets()) {
        let t = triage_results(&results);
        let good: Vec<&ConfigResult> = results.iter().filter(|r| r.good).collect();
        for opt in &t.optimal {
            prop_assert!(!good.iter().any(|g| dominates(g, opt)));
        }
        for pair in t.optimal.windows(2) {
            prop_assert!(pair[0].speedup_value() >= pair[1].speedup_value());
        }
    }

    #[test]
    fn suboptimal_points_have_a_reason(results in result_sets()) {
        let t = triage_results(&results);
        let good: Vec<&ConfigResult> = results.iter().filter(|r| r.good).collect();
        for sub in &t.suboptimal {
            let dominated = good.iter().any(|g| dominates(g, sub));
            let duplicate = t.optimal.iter().any(|o| near(o, sub));
            prop_assert!(dominated || duplicate);
        }
    }

    #[test]
    fn greedy_composites_grow_within_budget(components in single_site_components(), budget in 0.0f64..0.5) {
        let out = bce_greedy(&components, budget).unwrap();
        prop_assert!(out.len() <= components.len());

        for pair in out.windows(2) {
            prop_assert!(config_subsumes(&pair[1], &pair[0]).unwrap());
            prop_assert_eq!(pair[1].relaxed().count(), pair[0].relaxed().count() + 1);
        }

        if let Some(last) = out.last() {
            let spent: f64 = components
                .iter()
                .filter(|c| c.config.relaxed().all(|(site, _)| last.param(site) == Some(1)))
                .map(|c| c.error)
                .sum();
            prop_assert!(spent <= budget + 1e-12);
        }
    }
}
