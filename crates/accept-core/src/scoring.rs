//! Output loading and quality scoring.
//!
//! [`Scorer`] is the per-program collaborator that knows how to read a
//! run's output and how far an approximate output is from the precise one.
//! [`ScriptScorer`] delegates both to an executable in the program
//! directory:
//!
//! ```text
//! accept_eval load                      # stdout: JSON value or file:<path>
//! accept_eval score <precise> <approx>  # stdout: error in [0, 1]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;

use crate::build::run_with_timeout;
use crate::domain::{AcceptError, Output};

/// Default name of the scoring executable.
pub const EVAL_SCRIPT: &str = "accept_eval";

/// Loads and compares program outputs.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Read the output a run left in `dir`.
    async fn load(&self, dir: &Path) -> anyhow::Result<Output>;

    /// Quality error of `approx` against `precise`; higher is worse.
    async fn score(&self, precise: &Output, approx: &Output) -> anyhow::Result<f64>;
}

/// [`Scorer`] backed by an executable script.
#[derive(Debug, Clone)]
pub struct ScriptScorer {
    program_dir: PathBuf,
    script: String,
}

impl ScriptScorer {
    /// Use the default script of the program in `program_dir`.
    pub fn for_program(program_dir: &Path) -> Result<Self, AcceptError> {
        Self::with_script(program_dir, EVAL_SCRIPT)
    }

    pub fn with_script(program_dir: &Path, script: &str) -> Result<Self, AcceptError> {
        let path = program_dir.join(script);
        if !path.is_file() {
            return Err(AcceptError::User(format!(
                "no {} script found in {}; add an executable that implements \
                 `{} load` and `{} score <precise> <approx>`",
                script,
                program_dir.display(),
                script,
                script
            )));
        }
        Ok(Self {
            program_dir: program_dir.to_path_buf(),
            script: script.to_string(),
        })
    }

    async fn invoke(&self, cwd: &Path, args: &[String]) -> anyhow::Result<String> {
        let mut cmd = Command::new(self.program_dir.join(&self.script));
        cmd.current_dir(cwd).args(args);
        let outcome = run_with_timeout(cmd, None)
            .await
            .with_context(|| format!("running {} {}", self.script, args.join(" ")))?;
        match outcome.status {
            Some(status) if status.success() => Ok(outcome.stdout),
            Some(status) => bail!(
                "{} {} exited with {}: {}",
                self.script,
                args.first().map(String::as_str).unwrap_or(""),
                status,
                outcome.log.trim()
            ),
            None => bail!("{} did not finish", self.script),
        }
    }
}

#[async_trait]
impl Scorer for ScriptScorer {
    async fn load(&self, dir: &Path) -> anyhow::Result<Output> {
        let stdout = self.invoke(dir, &["load".to_string()]).await?;
        Ok(Output::parse(&stdout))
    }

    async fn score(&self, precise: &Output, approx: &Output) -> anyhow::Result<f64> {
        let stdout = self
            .invoke(
                &self.program_dir,
                &["score".to_string(), precise.to_arg(), approx.to_arg()],
            )
            .await?;
        let text = stdout.trim();
        let error: f64 = text
            .parse()
            .with_context(|| format!("score output is not a number: {:?}", text))?;
        if !error.is_finite() {
            bail!("score output is not finite: {}", error);
        }
        Ok(error)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, body: &str) {
        let path = dir.join(EVAL_SCRIPT);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn missing_script_is_user_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScriptScorer::for_program(dir.path()).unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().contains(EVAL_SCRIPT));
    }

    #[tokio::test]
    async fn script_load_and_score() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "#!/bin/sh\ncase \"$1\" in\n  load) cat out.json ;;\n  score) echo 0.25 ;;\nesac\n",
        );
        std::fs::write(dir.path().join("out.json"), "[1, 2, 3]").unwrap();

        let scorer = ScriptScorer::for_program(dir.path()).unwrap();
        let out = scorer.load(dir.path()).await.unwrap();
        assert_eq!(out, Output::Value(serde_json::json!([1, 2, 3])));

        let err = scorer.score(&out, &out).await.unwrap();
        assert!((err - 0.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn script_score_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "#!/bin/sh\necho not-a-number\n");
        let scorer = ScriptScorer::for_program(dir.path()).unwrap();
        let out = Output::Value(serde_json::json!(1));
        assert!(scorer.score(&out, &out).await.is_err());
    }
}
