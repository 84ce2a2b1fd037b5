use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{describe_config, SiteId};
use crate::result::{ConfigResult, Triage};

/// Render a triage the way `accept exp` prints it.
///
/// Optimal configs are always listed with their error and speedup. With
/// `verbose`, suboptimal configs follow the same way and bad configs are
/// listed with the reason they were rejected.
pub fn summarize(triage: &Triage<'_>, descs: &BTreeMap<SiteId, String>, verbose: bool) -> String {
    let mut out = format!(
        "{} optimal, {} suboptimal, {} bad\n",
        triage.optimal.len(),
        triage.suboptimal.len(),
        triage.bad.len()
    );
    for res in &triage.optimal {
        push_measured(&mut out, res, descs);
    }

    if verbose {
        out.push_str("\nsuboptimal configs:\n");
        for res in &triage.suboptimal {
            push_measured(&mut out, res, descs);
        }

        out.push_str("\nbad configs:\n");
        for res in &triage.bad {
            out.push_str(&describe_config(&res.config, descs));
            out.push('\n');
            out.push_str(&res.desc);
            out.push('\n');
        }
    }
    out
}

fn push_measured(out: &mut String, res: &ConfigResult, descs: &BTreeMap<SiteId, String>) {
    out.push_str(&describe_config(&res.config, descs));
    out.push('\n');
    match res.error {
        Some(e) => out.push_str(&format!("{:.1}% error\n", e.value * 100.0)),
        None => out.push_str("unknown error\n"),
    }
    match res.speedup {
        Some(s) => out.push_str(&format!("{} speedup\n", s)),
        None => out.push_str("unknown speedup\n"),
    }
}

/// Persisted outcome of one `accept exp` run over a program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultsArtifact {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub program: String,
    pub optimal: Vec<ConfigResult>,
    pub suboptimal: Vec<ConfigResult>,
    pub bad: Vec<ConfigResult>,
    /// Test-input re-measurements of the optimal configs, when requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test: Vec<ConfigResult>,
}

impl ResultsArtifact {
    pub const SCHEMA_VERSION: &'static str = "1";

    pub fn new(program: &str, triage: &Triage<'_>) -> Self {
        let owned = |v: &[&ConfigResult]| v.iter().map(|r| (*r).clone()).collect();
        Self {
            schema_version: Self::SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            program: program.to_string(),
            optimal: owned(&triage.optimal),
            suboptimal: owned(&triage.suboptimal),
            bad: owned(&triage.bad),
            test: Vec::new(),
        }
    }

    pub fn with_test(mut self, test: Vec<ConfigResult>) -> Self {
        self.test = test;
        self
    }
}

/// Write a results artifact as pretty JSON.
pub fn write_results_json(path: &Path, artifact: &ResultsArtifact) -> Result<()> {
    let content = serde_json::to_string_pretty(artifact).context("serialize results artifact")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelaxConfig;
    use crate::result::triage_results;
    use crate::uncertain::Uncertain;

    fn res(site: &str, speedup: f64, error: f64, good: bool, desc: &str) -> ConfigResult {
        ConfigResult {
            config: RelaxConfig::from_pairs([(site, 1)]),
            duration: Some(Uncertain::exact(10.0 / speedup)),
            speedup: Some(Uncertain::exact(speedup)),
            error: Some(Uncertain::exact(error)),
            good,
            safe: good,
            desc: desc.to_string(),
        }
    }

    fn descs() -> BTreeMap<SiteId, String> {
        let mut d = BTreeMap::new();
        d.insert(SiteId::new("loop:a"), "loop at sobel.c:42".to_string());
        d
    }

    #[test]
    fn summary_lists_optimal_configs() {
        let results = vec![
            res("loop:a", 2.0, 0.05, true, "good"),
            res("loop:b", 1.0, 0.9, false, "large error: 90.0%"),
        ];
        let triage = triage_results(&results);
        let text = summarize(&triage, &descs(), false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "1 optimal, 0 suboptimal, 1 bad");
        assert_eq!(lines[1], "loop at sobel.c:42 @ 1");
        assert_eq!(lines[2], "5.0% error");
        assert_eq!(lines[3], "2.00 +/- 0.00 speedup");
        assert!(!text.contains("bad configs"));
    }

    #[test]
    fn verbose_summary_explains_bad_configs() {
        let results = vec![res("loop:b", 1.0, 0.9, false, "large error: 90.0%")];
        let triage = triage_results(&results);
        let text = summarize(&triage, &descs(), true);
        assert!(text.contains("\nbad configs:\nloop:b @ 1\nlarge error: 90.0%\n"));
    }

    #[test]
    fn artifact_written_as_json() {
        let results = vec![res("loop:a", 2.0, 0.05, true, "good")];
        let triage = triage_results(&results);
        let artifact = ResultsArtifact::new("apps/sobel", &triage);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        write_results_json(&path, &artifact).unwrap();

        let back: ResultsArtifact =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, artifact);
        assert_eq!(back.optimal.len(), 1);
    }
}
