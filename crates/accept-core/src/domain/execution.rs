//! The record of one build-and-run attempt.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{RelaxConfig, SiteId};

/// Prefix marking a loaded output as a file reference.
pub const FILE_OUTPUT_PREFIX: &str = "file:";

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExitStatus {
    /// The program exited with this code.
    Code(i32),
    /// The run exceeded its timeout and was killed.
    TimedOut,
    /// The harness itself failed (build failure, missing timing file, ...).
    InternalError(String),
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExitStatus::TimedOut)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(c) => write!(f, "exit code {}", c),
            ExitStatus::TimedOut => f.write_str("timed out"),
            ExitStatus::InternalError(msg) => f.write_str(msg),
        }
    }
}

/// Program output as loaded by the scoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    /// An in-band value (numbers, strings, arrays, ...).
    Value(serde_json::Value),
    /// A file saved into the outputs directory.
    File(PathBuf),
}

impl Output {
    /// Interpret text printed by a loader: `file:<path>` is a file
    /// reference, anything else is parsed as JSON and falls back to a
    /// plain string.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(path) = text.strip_prefix(FILE_OUTPUT_PREFIX) {
            return Output::File(PathBuf::from(path));
        }
        match serde_json::from_str(text) {
            Ok(value) => Output::Value(value),
            Err(_) => Output::Value(serde_json::Value::String(text.to_string())),
        }
    }

    /// Render as a single command-line argument for a scorer.
    pub fn to_arg(&self) -> String {
        match self {
            Output::Value(v) => v.to_string(),
            Output::File(p) => format!("{}{}", FILE_OUTPUT_PREFIX, p.display()),
        }
    }
}

/// Immutable result of one `(dir, config, rep, test)` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Loaded output; absent when the run did not succeed.
    pub output: Option<Output>,
    /// Wall-clock seconds; absent on timeout or build failure.
    pub elapsed: Option<f64>,
    pub status: ExitStatus,
    /// The config used. For precise runs this is the base config the
    /// build discovered.
    pub config: Option<RelaxConfig>,
    /// Region-of-interest seconds reported by the program.
    pub roi_time: Option<f64>,
    /// Combined build and run log.
    pub log: String,
    /// Site descriptions (precise runs only).
    pub descs: Option<BTreeMap<SiteId, String>>,
}

impl Execution {
    /// An execution that never got to run the program.
    pub fn internal_error(message: impl Into<String>, log: impl Into<String>) -> Self {
        Self {
            output: None,
            elapsed: None,
            status: ExitStatus::InternalError(message.into()),
            config: None,
            roi_time: None,
            log: log.into(),
            descs: None,
        }
    }

    /// The duration used for speedup computation: ROI time if the program
    /// reported one, wall-clock time otherwise.
    pub fn duration(&self) -> Option<f64> {
        self.roi_time.or(self.elapsed)
    }

    pub fn succeeded(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_parse_file_sentinel() {
        assert_eq!(
            Output::parse("file:out.pgm\n"),
            Output::File(PathBuf::from("out.pgm"))
        );
    }

    #[test]
    fn output_parse_json_and_text() {
        assert_eq!(
            Output::parse("[1, 2.5]"),
            Output::Value(serde_json::json!([1, 2.5]))
        );
        assert_eq!(
            Output::parse("hello world"),
            Output::Value(serde_json::json!("hello world"))
        );
    }

    #[test]
    fn output_to_arg() {
        assert_eq!(Output::Value(serde_json::json!([1, 2])).to_arg(), "[1,2]");
        assert_eq!(Output::File(PathBuf::from("/o/x.pgm")).to_arg(), "file:/o/x.pgm");
    }

    #[test]
    fn duration_prefers_roi_time() {
        let mut exec = Execution::internal_error("x", "");
        assert_eq!(exec.duration(), None);
        exec.elapsed = Some(2.0);
        assert_eq!(exec.duration(), Some(2.0));
        exec.roi_time = Some(1.5);
        assert_eq!(exec.duration(), Some(1.5));
    }

    #[test]
    fn status_serde_roundtrip() {
        for status in [
            ExitStatus::Code(3),
            ExitStatus::TimedOut,
            ExitStatus::InternalError("build failed".into()),
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let back: ExitStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(status, back);
        }
    }
}
