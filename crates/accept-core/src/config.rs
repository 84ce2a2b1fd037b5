//! Relaxation configurations and the algebra over them.
//!
//! A [`RelaxConfig`] assigns an aggressiveness parameter to every
//! relaxation site of one program. Parameter `0` means the site runs
//! precisely. Every config for a program ranges over the same ordered site
//! list, fixed by the base config the precise build reports.
//!
//! The on-disk format is one `<param> <site-id>` pair per line; the
//! optional description file holds `<site-id> <free text>` lines.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggressiveness of one relaxation site. `0` = precise.
pub type Param = u32;

/// Errors from configuration algebra and parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("configs range over different sites: {left} vs {right}")]
    SiteMismatch { left: String, right: String },

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Identifier of one relaxation site, of the form `<kind>:<location>`.
///
/// The kind prefix (`loop`, `lock`, `barrier`, `alias`, ...) selects the
/// legal parameter range; see [`SiteId::max_param`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The opportunity kind (text before the first `:`), or the whole id
    /// when there is no prefix.
    pub fn kind(&self) -> &str {
        self.0.split_once(':').map(|(k, _)| k).unwrap_or(&self.0)
    }

    /// Largest legal parameter for this site's kind.
    pub fn max_param(&self) -> Param {
        match self.kind() {
            "loop" => 10,
            "lock" | "barrier" | "alias" => 1,
            _ => 1,
        }
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Ordered assignment of parameters to every site of a program.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelaxConfig {
    sites: Vec<(SiteId, Param)>,
}

impl RelaxConfig {
    pub fn new(sites: Vec<(SiteId, Param)>) -> Self {
        Self { sites }
    }

    /// Build from `(site, param)` pairs given as string slices.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Param)>) -> Self {
        Self::new(pairs.into_iter().map(|(s, p)| (SiteId::new(s), p)).collect())
    }

    pub fn sites(&self) -> &[(SiteId, Param)] {
        &self.sites
    }

    pub fn iter(&self) -> impl Iterator<Item = &(SiteId, Param)> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Parameter assigned to `site`, if the site is known.
    pub fn param(&self, site: &SiteId) -> Option<Param> {
        self.sites.iter().find(|(s, _)| s == site).map(|(_, p)| *p)
    }

    /// Sites with a non-zero parameter.
    pub fn relaxed(&self) -> impl Iterator<Item = &(SiteId, Param)> {
        self.sites.iter().filter(|(_, p)| *p != 0)
    }

    /// True when every site is precise.
    pub fn is_precise(&self) -> bool {
        self.relaxed().next().is_none()
    }

    fn same_sites(&self, other: &RelaxConfig) -> Result<(), ConfigError> {
        let matches = self.sites.len() == other.sites.len()
            && self
                .sites
                .iter()
                .zip(&other.sites)
                .all(|((a, _), (b, _))| a == b);
        if matches {
            Ok(())
        } else {
            Err(ConfigError::SiteMismatch {
                left: self.site_list(),
                right: other.site_list(),
            })
        }
    }

    fn site_list(&self) -> String {
        let ids: Vec<&str> = self.sites.iter().map(|(s, _)| s.as_str()).collect();
        format!("[{}]", ids.join(", "))
    }
}

impl fmt::Display for RelaxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_precise() {
            return f.write_str("precise");
        }
        let parts: Vec<String> = self
            .relaxed()
            .map(|(site, p)| format!("{}={}", site, p))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// One single-site variant per site: site `i` set to `1`, all other sites
/// left as in `base`.
pub fn permute_config(base: &RelaxConfig) -> Vec<RelaxConfig> {
    (0..base.len())
        .map(|i| {
            let mut config = base.clone();
            config.sites[i].1 = 1;
            config
        })
        .collect()
}

/// Union of the non-zero entries of `configs`, laid over the site ordering
/// of the first config. When two inputs disagree on a site the later one
/// wins. Returns `Ok(None)` for empty input.
pub fn combine_configs<'a, I>(configs: I) -> Result<Option<RelaxConfig>, ConfigError>
where
    I: IntoIterator<Item = &'a RelaxConfig>,
{
    let mut iter = configs.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };

    let mut combined = first.clone();
    for config in iter {
        combined.same_sites(config)?;
        for (slot, (_, p)) in combined.sites.iter_mut().zip(&config.sites) {
            if *p != 0 {
                slot.1 = *p;
            }
        }
    }
    Ok(Some(combined))
}

/// Add `amount` to every non-zero parameter.
pub fn increase_config(config: &RelaxConfig, amount: Param) -> RelaxConfig {
    RelaxConfig::new(
        config
            .sites
            .iter()
            .map(|(s, p)| {
                let p = if *p == 0 { 0 } else { p.saturating_add(amount) };
                (s.clone(), p)
            })
            .collect(),
    )
}

/// Clamp every parameter to its site kind's maximum.
pub fn cap_config(config: &RelaxConfig) -> RelaxConfig {
    RelaxConfig::new(
        config
            .sites
            .iter()
            .map(|(s, p)| (s.clone(), (*p).min(s.max_param())))
            .collect(),
    )
}

/// True iff every parameter of `a` is at least the matching one in `b`.
pub fn config_subsumes(a: &RelaxConfig, b: &RelaxConfig) -> Result<bool, ConfigError> {
    a.same_sites(b)?;
    Ok(a.sites.iter().zip(&b.sites).all(|((_, pa), (_, pb))| pa >= pb))
}

// ---------------------------------------------------------------------------
// File formats
// ---------------------------------------------------------------------------

/// Parse `<param> <site-id>` lines. Blank lines are skipped.
pub fn parse_relax_config(text: &str) -> Result<RelaxConfig, ConfigError> {
    let mut sites = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (param, site) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| ConfigError::Parse {
                line: idx + 1,
                reason: format!("expected `<param> <site>`, got {:?}", line),
            })?;
        let param: Param = param.parse().map_err(|e| ConfigError::Parse {
            line: idx + 1,
            reason: format!("bad parameter {:?}: {}", param, e),
        })?;
        sites.push((SiteId::new(site.trim()), param));
    }
    Ok(RelaxConfig::new(sites))
}

/// Inverse of [`parse_relax_config`].
pub fn dump_relax_config(config: &RelaxConfig) -> String {
    config
        .sites
        .iter()
        .map(|(site, p)| format!("{} {}\n", p, site))
        .collect()
}

/// Parse `<site-id> <description>` lines into a lookup table.
pub fn parse_relax_desc(text: &str) -> Result<BTreeMap<SiteId, String>, ConfigError> {
    let mut out = BTreeMap::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (site, desc) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        out.insert(SiteId::new(site), desc.trim().to_string());
    }
    Ok(out)
}

/// Human-readable rendering: `"<desc> @ <param>"` for each relaxed site,
/// or `"no optimizations"`.
pub fn describe_config(config: &RelaxConfig, descs: &BTreeMap<SiteId, String>) -> String {
    let parts: Vec<String> = config
        .relaxed()
        .map(|(site, p)| {
            let desc = descs
                .get(site)
                .filter(|d| !d.is_empty())
                .map(String::as_str)
                .unwrap_or_else(|| site.as_str());
            format!("{} @ {}", desc, p)
        })
        .collect();
    if parts.is_empty() {
        "no optimizations".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RelaxConfig {
        RelaxConfig::from_pairs([("loop:a.c:10", 0), ("lock:b.c:3", 0), ("loop:c.c:7", 0)])
    }

    #[test]
    fn permute_yields_one_variant_per_site() {
        let b = base();
        let variants = permute_config(&b);
        assert_eq!(variants.len(), b.len());
        for (i, v) in variants.iter().enumerate() {
            let diffs: Vec<usize> = (0..b.len())
                .filter(|&j| v.sites()[j] != b.sites()[j])
                .collect();
            assert_eq!(diffs, vec![i]);
            assert_eq!(v.sites()[i].1, 1);
        }
    }

    #[test]
    fn permute_empty_base() {
        assert!(permute_config(&RelaxConfig::new(vec![])).is_empty());
    }

    #[test]
    fn combine_singleton_is_identity() {
        let c = RelaxConfig::from_pairs([("loop:a", 2), ("lock:b", 0)]);
        assert_eq!(combine_configs([&c]).unwrap(), Some(c));
    }

    #[test]
    fn combine_empty_is_none() {
        let none: [&RelaxConfig; 0] = [];
        assert_eq!(combine_configs(none).unwrap(), None);
    }

    #[test]
    fn combine_unions_nonzero_sites() {
        let a = RelaxConfig::from_pairs([("loop:a", 1), ("lock:b", 0), ("loop:c", 0)]);
        let b = RelaxConfig::from_pairs([("loop:a", 0), ("lock:b", 1), ("loop:c", 0)]);
        let c = combine_configs([&a, &b]).unwrap().unwrap();
        assert_eq!(
            c,
            RelaxConfig::from_pairs([("loop:a", 1), ("lock:b", 1), ("loop:c", 0)])
        );
    }

    #[test]
    fn combine_rejects_mismatched_sites() {
        let a = RelaxConfig::from_pairs([("loop:a", 1)]);
        let b = RelaxConfig::from_pairs([("loop:z", 1)]);
        assert!(matches!(
            combine_configs([&a, &b]),
            Err(ConfigError::SiteMismatch { .. })
        ));
    }

    #[test]
    fn increase_touches_only_relaxed_sites() {
        let c = RelaxConfig::from_pairs([("loop:a", 1), ("lock:b", 0)]);
        assert_eq!(
            increase_config(&c, 2),
            RelaxConfig::from_pairs([("loop:a", 3), ("lock:b", 0)])
        );
    }

    #[test]
    fn cap_clamps_per_kind() {
        let c = RelaxConfig::from_pairs([
            ("loop:a", 12),
            ("lock:b", 2),
            ("barrier:c", 5),
            ("alias:d", 1),
            ("mystery:e", 4),
        ]);
        assert_eq!(
            cap_config(&c),
            RelaxConfig::from_pairs([
                ("loop:a", 10),
                ("lock:b", 1),
                ("barrier:c", 1),
                ("alias:d", 1),
                ("mystery:e", 1),
            ])
        );
    }

    #[test]
    fn increase_then_cap_reaches_fixpoint() {
        let c = RelaxConfig::from_pairs([("lock:b", 1), ("loop:a", 0)]);
        assert_eq!(cap_config(&increase_config(&c, 1)), c);
    }

    #[test]
    fn subsumes_is_reflexive() {
        let c = RelaxConfig::from_pairs([("loop:a", 3), ("lock:b", 0)]);
        assert!(config_subsumes(&c, &c).unwrap());
    }

    #[test]
    fn subsumes_compares_every_site() {
        let big = RelaxConfig::from_pairs([("loop:a", 3), ("lock:b", 1)]);
        let small = RelaxConfig::from_pairs([("loop:a", 1), ("lock:b", 0)]);
        let other = RelaxConfig::from_pairs([("loop:a", 0), ("lock:b", 1)]);
        assert!(config_subsumes(&big, &small).unwrap());
        assert!(!config_subsumes(&small, &big).unwrap());
        assert!(!config_subsumes(&small, &other).unwrap());
    }

    #[test]
    fn subsumes_rejects_different_sites() {
        let a = RelaxConfig::from_pairs([("loop:a", 1)]);
        let b = RelaxConfig::from_pairs([("loop:a", 1), ("lock:b", 0)]);
        assert!(matches!(
            config_subsumes(&a, &b),
            Err(ConfigError::SiteMismatch { .. })
        ));
    }

    #[test]
    fn config_file_roundtrip() {
        let text = "0 loop:a.c:10\n\n3 lock:b.c:3\n";
        let c = parse_relax_config(text).unwrap();
        assert_eq!(
            c,
            RelaxConfig::from_pairs([("loop:a.c:10", 0), ("lock:b.c:3", 3)])
        );
        assert_eq!(dump_relax_config(&c), "0 loop:a.c:10\n3 lock:b.c:3\n");
    }

    #[test]
    fn config_file_bad_param() {
        let err = parse_relax_config("x loop:a\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }));
        let err = parse_relax_config("1 loop:a\n4\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 2, .. }));
    }

    #[test]
    fn describe_uses_descriptions() {
        let descs = parse_relax_desc("loop:a perforate loop in main\nlock:b\n").unwrap();
        let c = RelaxConfig::from_pairs([("loop:a", 2), ("lock:b", 1), ("loop:c", 0)]);
        assert_eq!(
            describe_config(&c, &descs),
            "perforate loop in main @ 2, lock:b @ 1"
        );
        assert_eq!(
            describe_config(&RelaxConfig::from_pairs([("loop:a", 0)]), &descs),
            "no optimizations"
        );
    }

    #[test]
    fn site_kind_prefix() {
        assert_eq!(SiteId::new("loop:a.c:3").kind(), "loop");
        assert_eq!(SiteId::new("plain").kind(), "plain");
    }

    #[test]
    fn display_lists_relaxed_sites() {
        assert_eq!(base().to_string(), "precise");
        let c = RelaxConfig::from_pairs([("loop:a", 2), ("lock:b", 0)]);
        assert_eq!(c.to_string(), "loop:a=2");
    }
}
