//! Building and running a program variant.
//!
//! [`BuildSystem`] is the seam between the search and the toolchain. The
//! default implementation, [`MakeBuildSystem`], drives the program's
//! Makefile: `make clean`, `make build` (with `CLANGARGS` selecting the
//! relaxed or precise compile) and `make run` / `make run_test`.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::ExitStatus;

/// Compiler flags for a relaxed build.
pub const APPROX_CLANGARGS: &str = "-mllvm -accept-relax -O3";
/// Compiler flags for a precise build.
pub const PRECISE_CLANGARGS: &str = "-O3";

/// Build failures, carrying the captured output.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("`{command}` failed with {status}")]
    Failed {
        command: String,
        status: String,
        log: String,
    },

    #[error("`{command}` timed out after {seconds:.1}s")]
    TimedOut {
        command: String,
        seconds: f64,
        log: String,
    },

    #[error("could not run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Combined stdout/stderr of the failing command.
    pub fn log(&self) -> Option<&str> {
        match self {
            BuildError::Failed { log, .. } | BuildError::TimedOut { log, .. } => Some(log),
            BuildError::Io { .. } => None,
        }
    }
}

/// Outcome of running the built program once.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Wall-clock seconds; `None` when the run was killed on timeout.
    pub elapsed: Option<f64>,
    pub status: ExitStatus,
    pub log: String,
}

/// Compiles and executes a program inside a prepared directory.
#[async_trait]
pub trait BuildSystem: Send + Sync {
    /// Build the program in `dir`. Returns the build log.
    async fn build(&self, dir: &Path, approx: bool) -> Result<String, BuildError>;

    /// Run the built program in `dir`, on the held-out input when `test`.
    /// Timeouts and non-zero exits are reported in the outcome, not as
    /// errors.
    async fn execute(
        &self,
        dir: &Path,
        timeout: Option<Duration>,
        approx: bool,
        test: bool,
    ) -> Result<RunOutcome, BuildError>;
}

// ---------------------------------------------------------------------------
// Subprocess helper
// ---------------------------------------------------------------------------

/// Captured result of [`run_with_timeout`].
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// `None` when the command was killed on timeout.
    pub status: Option<std::process::ExitStatus>,
    pub elapsed: Duration,
    pub stdout: String,
    /// stdout followed by stderr.
    pub log: String,
}

/// Run `command` to completion or until `timeout` expires, in which case
/// the child is killed.
pub async fn run_with_timeout(
    mut command: Command,
    timeout: Option<Duration>,
) -> std::io::Result<CommandOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let child = command.spawn()?;
    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output()).await,
        None => Ok(child.wait_with_output().await),
    };
    let elapsed = start.elapsed();

    match waited {
        Ok(output) => {
            let output = output?;
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let mut log = stdout.clone();
            log.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(CommandOutcome {
                status: Some(output.status),
                elapsed,
                stdout,
                log,
            })
        }
        // The child was dropped with the timed-out future and killed.
        Err(_) => Ok(CommandOutcome {
            status: None,
            elapsed,
            stdout: String::new(),
            log: String::new(),
        }),
    }
}

// ---------------------------------------------------------------------------
// MakeBuildSystem
// ---------------------------------------------------------------------------

/// Settings for [`MakeBuildSystem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakeSettings {
    /// The make executable.
    pub make: String,
    /// Extra `NAME=value` variables passed to every make invocation
    /// (e.g. `ENERCDIR`, `APP_MK`).
    pub variables: Vec<(String, String)>,
    /// Upper bound for `make clean` and `make build`.
    pub build_timeout_secs: Option<u64>,
}

impl Default for MakeSettings {
    fn default() -> Self {
        Self {
            make: "make".to_string(),
            variables: Vec::new(),
            build_timeout_secs: None,
        }
    }
}

/// Makefile-driven [`BuildSystem`].
#[derive(Debug, Clone, Default)]
pub struct MakeBuildSystem {
    settings: MakeSettings,
}

impl MakeBuildSystem {
    pub fn new(settings: MakeSettings) -> Self {
        Self { settings }
    }

    fn make(&self, dir: &Path, target: &str, extra: &[String]) -> (Command, String) {
        let mut cmd = Command::new(&self.settings.make);
        cmd.current_dir(dir).arg(target);
        let mut shown = format!("{} {}", self.settings.make, target);
        for (name, value) in &self.settings.variables {
            cmd.arg(format!("{}={}", name, value));
        }
        for arg in extra {
            cmd.arg(arg);
            shown.push(' ');
            shown.push_str(arg);
        }
        (cmd, shown)
    }

    async fn checked(&self, dir: &Path, target: &str, extra: &[String]) -> Result<String, BuildError> {
        let (cmd, shown) = self.make(dir, target, extra);
        let timeout = self.settings.build_timeout_secs.map(Duration::from_secs);
        let outcome = run_with_timeout(cmd, timeout)
            .await
            .map_err(|source| BuildError::Io {
                command: shown.clone(),
                source,
            })?;

        match outcome.status {
            Some(status) if status.success() => Ok(outcome.log),
            Some(status) => Err(BuildError::Failed {
                command: shown,
                status: status.to_string(),
                log: outcome.log,
            }),
            None => Err(BuildError::TimedOut {
                command: shown,
                seconds: outcome.elapsed.as_secs_f64(),
                log: outcome.log,
            }),
        }
    }
}

#[async_trait]
impl BuildSystem for MakeBuildSystem {
    async fn build(&self, dir: &Path, approx: bool) -> Result<String, BuildError> {
        let mut log = self.checked(dir, "clean", &[]).await?;
        let clangargs = if approx {
            APPROX_CLANGARGS
        } else {
            PRECISE_CLANGARGS
        };
        log.push_str(
            &self
                .checked(dir, "build", &[format!("CLANGARGS={}", clangargs)])
                .await?,
        );
        debug!(dir = %dir.display(), approx, "Build finished");
        Ok(log)
    }

    async fn execute(
        &self,
        dir: &Path,
        timeout: Option<Duration>,
        approx: bool,
        test: bool,
    ) -> Result<RunOutcome, BuildError> {
        let target = if test { "run_test" } else { "run" };
        let (cmd, shown) = self.make(dir, target, &[]);
        let outcome = run_with_timeout(cmd, timeout)
            .await
            .map_err(|source| BuildError::Io {
                command: shown,
                source,
            })?;

        let Some(status) = outcome.status else {
            warn!(dir = %dir.display(), approx, "Execution timed out");
            return Ok(RunOutcome {
                elapsed: None,
                status: ExitStatus::TimedOut,
                log: outcome.log,
            });
        };

        let status = match status.code() {
            Some(code) => ExitStatus::Code(code),
            None => ExitStatus::InternalError(format!("program terminated: {}", status)),
        };
        Ok(RunOutcome {
            elapsed: Some(outcome.elapsed.as_secs_f64()),
            status,
            log: outcome.log,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_with_timeout_captures_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2; exit 3");
        let outcome = run_with_timeout(cmd, None).await.unwrap();
        assert_eq!(outcome.status.and_then(|s| s.code()), Some(3));
        assert!(outcome.log.contains("out"));
        assert!(outcome.log.contains("err"));
    }

    #[tokio::test]
    async fn run_with_timeout_kills_slow_command() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 5");
        let outcome = run_with_timeout(cmd, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(outcome.status.is_none());
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    fn makefile_dir(body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Makefile"), body).unwrap();
        dir
    }

    #[tokio::test]
    async fn make_build_and_run() {
        let dir = makefile_dir(
            "clean:\n\t@echo cleaning\nbuild:\n\t@echo flags=$(CLANGARGS)\nrun:\n\t@echo running\nrun_test:\n\t@exit 4\n",
        );
        let make = MakeBuildSystem::default();

        let log = make.build(dir.path(), true).await.unwrap();
        assert!(log.contains("cleaning"));
        assert!(log.contains("-accept-relax"));

        let run = make.execute(dir.path(), None, true, false).await.unwrap();
        assert_eq!(run.status, ExitStatus::Code(0));
        assert!(run.elapsed.is_some());
        assert!(run.log.contains("running"));

        // make reports a failed recipe as 2, not the recipe's own code.
        let test = make.execute(dir.path(), None, true, true).await.unwrap();
        assert!(matches!(test.status, ExitStatus::Code(c) if c != 0));
        assert!(!test.status.is_success());
    }

    #[tokio::test]
    async fn make_build_failure_keeps_log() {
        let dir = makefile_dir("clean:\n\t@true\nbuild:\n\t@echo compile error; exit 1\n");
        let err = MakeBuildSystem::default()
            .build(dir.path(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Failed { .. }));
        assert!(err.log().unwrap().contains("compile error"));
    }
}
