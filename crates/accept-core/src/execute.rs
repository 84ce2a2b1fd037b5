//! The memoized build-and-run job.
//!
//! [`BuildAndExecute`] builds one configuration of a program in a fresh
//! sandbox, runs it and loads its output. Everything that can go wrong with
//! the program itself ends up in the returned [`Execution`]; the job only
//! fails when the harness cannot even set up the sandbox.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::build::BuildSystem;
use crate::config::{dump_relax_config, parse_relax_config, parse_relax_desc, RelaxConfig};
use crate::domain::{Execution, ExitStatus, Output};
use crate::sandbox::{Sandbox, SandboxMode};
use crate::scheduler::Job;
use crate::scoring::Scorer;

/// Relaxation config the compiler reads (and, for precise builds, writes).
pub const CONFIG_FILE: &str = "accept_config.txt";
/// Site descriptions written by precise builds.
pub const DESC_FILE: &str = "accept_config_desc.txt";
/// ROI seconds reported by the program.
pub const TIME_FILE: &str = "accept_time.txt";

/// Settings for preparing and post-processing runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessSettings {
    pub sandbox_mode: SandboxMode,
    /// Leave sandboxes on disk for debugging.
    pub keep_sandbox: bool,
    /// Where `file:` outputs are saved.
    pub outputs_dir: PathBuf,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            sandbox_mode: SandboxMode::Symlink,
            keep_sandbox: false,
            outputs_dir: PathBuf::from("saved_outputs"),
        }
    }
}

/// The collaborators a run needs.
pub struct Harness {
    pub build: Arc<dyn BuildSystem>,
    pub scorer: Arc<dyn Scorer>,
    pub settings: HarnessSettings,
}

impl Harness {
    pub fn new(
        build: Arc<dyn BuildSystem>,
        scorer: Arc<dyn Scorer>,
        settings: HarnessSettings,
    ) -> Self {
        Self {
            build,
            scorer,
            settings,
        }
    }
}

/// Build and run `dir` under `config` (precise when `None`).
///
/// Keyed on `(dir, config, rep, test)`; the timeout is a tuning input.
#[derive(Clone)]
pub struct BuildAndExecute {
    pub dir: PathBuf,
    pub config: Option<RelaxConfig>,
    pub rep: u32,
    pub test: bool,
    pub timeout: Option<Duration>,
    harness: Arc<Harness>,
}

impl BuildAndExecute {
    pub fn new(
        harness: Arc<Harness>,
        dir: &Path,
        config: Option<RelaxConfig>,
        rep: u32,
        test: bool,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            config,
            rep,
            test,
            timeout: None,
            harness,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn approx(&self) -> bool {
        self.config.is_some()
    }

    fn finish(&self, status: ExitStatus, elapsed: Option<f64>, log: String) -> Execution {
        Execution {
            output: None,
            elapsed,
            status,
            config: self.config.clone(),
            roi_time: None,
            log,
            descs: None,
        }
    }

    async fn prepare(&self, sandbox: &Sandbox) -> anyhow::Result<()> {
        sandbox.remove_file(CONFIG_FILE)?;
        sandbox.remove_file(DESC_FILE)?;
        sandbox.remove_file(TIME_FILE)?;
        if let Some(config) = &self.config {
            tokio::fs::write(sandbox.path().join(CONFIG_FILE), dump_relax_config(config)).await?;
        }
        Ok(())
    }

    /// Copy a `file:` output out of the sandbox under a random name.
    async fn sequester(&self, sandbox: &Sandbox, output: Output) -> anyhow::Result<Output> {
        let Output::File(path) = output else {
            return Ok(output);
        };
        let src = if path.is_absolute() {
            path
        } else {
            sandbox.path().join(path)
        };
        let outputs_dir = &self.harness.settings.outputs_dir;
        tokio::fs::create_dir_all(outputs_dir).await?;
        let mut name = uuid::Uuid::new_v4().simple().to_string();
        if let Some(ext) = src.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        let dst = outputs_dir.join(name);
        tokio::fs::copy(&src, &dst).await?;
        debug!(from = %src.display(), to = %dst.display(), "Saved file output");
        Ok(Output::File(dst))
    }
}

async fn read_roi_time(dir: &Path) -> Option<f64> {
    let text = tokio::fs::read_to_string(dir.join(TIME_FILE)).await.ok()?;
    text.trim().parse().ok()
}

#[async_trait]
impl Job for BuildAndExecute {
    type Output = Execution;
    type Args = (PathBuf, Option<RelaxConfig>, u32, bool);
    const NAME: &'static str = "build_and_execute";

    fn args(&self) -> Self::Args {
        (self.dir.clone(), self.config.clone(), self.rep, self.test)
    }

    async fn run(&self) -> anyhow::Result<Execution> {
        let sandbox = Sandbox::create_async(
            self.dir.clone(),
            self.harness.settings.sandbox_mode,
            self.harness.settings.keep_sandbox,
        )
        .await?;
        let exec = self.run_in(&sandbox).await;
        sandbox.dispose().await;
        exec
    }
}

impl BuildAndExecute {
    async fn run_in(&self, sandbox: &Sandbox) -> anyhow::Result<Execution> {
        let harness = &self.harness;
        self.prepare(sandbox).await?;

        let mut log = match harness.build.build(sandbox.path(), self.approx()).await {
            Ok(log) => log,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Build failed");
                let log = e.log().unwrap_or_default().to_string();
                return Ok(self.finish(
                    ExitStatus::InternalError(format!("build failed: {}", e)),
                    None,
                    log,
                ));
            }
        };

        // Precise builds report the site list.
        let mut discovered = None;
        if !self.approx() {
            let config_text = tokio::fs::read_to_string(sandbox.path().join(CONFIG_FILE)).await;
            let config = match config_text.map(|t| parse_relax_config(&t)) {
                Ok(Ok(config)) => config,
                Ok(Err(e)) => {
                    return Ok(self.finish(
                        ExitStatus::InternalError(format!("unreadable {}: {}", CONFIG_FILE, e)),
                        None,
                        log,
                    ))
                }
                Err(e) => {
                    return Ok(self.finish(
                        ExitStatus::InternalError(format!(
                            "precise build produced no {}: {}",
                            CONFIG_FILE, e
                        )),
                        None,
                        log,
                    ))
                }
            };
            let descs = match tokio::fs::read_to_string(sandbox.path().join(DESC_FILE)).await {
                Ok(text) => parse_relax_desc(&text).unwrap_or_default(),
                Err(_) => Default::default(),
            };
            discovered = Some((config, descs));
        }

        let run = match harness
            .build
            .execute(sandbox.path(), self.timeout, self.approx(), self.test)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                return Ok(self.finish(
                    ExitStatus::InternalError(format!("execution failed: {}", e)),
                    None,
                    log,
                ))
            }
        };
        log.push_str(&run.log);

        let mut exec = self.finish(run.status.clone(), run.elapsed, log);
        if let Some((config, descs)) = discovered {
            exec.config = Some(config);
            exec.descs = Some(descs);
        }
        if !run.status.is_success() {
            info!(dir = %self.dir.display(), rep = self.rep, status = %run.status, "Run did not succeed");
            return Ok(exec);
        }

        match read_roi_time(sandbox.path()).await {
            Some(t) => exec.roi_time = Some(t),
            None => {
                exec.status = ExitStatus::InternalError(format!("missing or invalid {}", TIME_FILE));
                return Ok(exec);
            }
        }

        let loaded = match harness.scorer.load(sandbox.path()).await {
            Ok(output) => self.sequester(sandbox, output).await,
            Err(e) => Err(e),
        };
        match loaded {
            Ok(output) => exec.output = Some(output),
            Err(e) => {
                exec.status = ExitStatus::InternalError(format!("output loading failed: {:#}", e));
            }
        }
        Ok(exec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildError, RunOutcome};
    use crate::scheduler::job_key;

    struct NoBuild;

    #[async_trait]
    impl BuildSystem for NoBuild {
        async fn build(&self, _dir: &Path, _approx: bool) -> Result<String, BuildError> {
            Err(BuildError::Failed {
                command: "make build".into(),
                status: "exit status: 2".into(),
                log: "syntax error".into(),
            })
        }

        async fn execute(
            &self,
            _dir: &Path,
            _timeout: Option<Duration>,
            _approx: bool,
            _test: bool,
        ) -> Result<RunOutcome, BuildError> {
            unreachable!("build never succeeds")
        }
    }

    struct NoScore;

    #[async_trait]
    impl Scorer for NoScore {
        async fn load(&self, _dir: &Path) -> anyhow::Result<Output> {
            anyhow::bail!("no output")
        }

        async fn score(&self, _p: &Output, _a: &Output) -> anyhow::Result<f64> {
            Ok(0.0)
        }
    }

    fn harness() -> Arc<Harness> {
        Arc::new(Harness::new(
            Arc::new(NoBuild),
            Arc::new(NoScore),
            HarnessSettings::default(),
        ))
    }

    #[test]
    fn timeout_is_not_part_of_key() {
        let h = harness();
        let a = BuildAndExecute::new(h.clone(), Path::new("apps/sobel"), None, 0, false);
        let b = a.clone().with_timeout(Some(Duration::from_secs(3)));
        assert_eq!(job_key(&a).unwrap(), job_key(&b).unwrap());

        let c = BuildAndExecute::new(h, Path::new("apps/sobel"), None, 1, false);
        assert_ne!(job_key(&a).unwrap(), job_key(&c).unwrap());
    }

    #[tokio::test]
    async fn build_failure_is_captured_as_data() {
        let dir = tempfile::tempdir().unwrap();
        let job = BuildAndExecute::new(harness(), dir.path(), None, 0, false);
        let exec = job.run().await.unwrap();
        assert!(matches!(exec.status, ExitStatus::InternalError(ref m) if m.contains("build failed")));
        assert_eq!(exec.log, "syntax error");
        assert!(exec.elapsed.is_none());
    }
}
