//! Scratch directories for building and running one program variant.
//!
//! A [`Sandbox`] is a temporary directory populated from a program
//! directory, either by symlinking each top-level entry or by copying the
//! tree. It is removed when dropped unless created with `keep`. Nothing
//! here changes the process working directory; callers pass the sandbox
//! path to the commands they spawn.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How a sandbox is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// Symlink each top-level entry of the source directory.
    #[default]
    Symlink,
    /// Recursively copy the source directory.
    Copy,
}

/// A populated temporary directory.
pub struct Sandbox {
    dir: tempfile::TempDir,
    source: PathBuf,
}

impl Sandbox {
    /// Create a sandbox mirroring `source`.
    pub fn create(source: &Path, mode: SandboxMode, keep: bool) -> io::Result<Self> {
        let source = source.canonicalize()?;
        let dir = tempfile::Builder::new()
            .prefix("accept-")
            .keep(keep)
            .tempdir()?;

        for entry in std::fs::read_dir(&source)? {
            let entry = entry?;
            let dst = dir.path().join(entry.file_name());
            match mode {
                SandboxMode::Symlink => link(&entry.path(), &dst)?,
                SandboxMode::Copy => copy_recursive(&entry.path(), &dst)?,
            }
        }

        if keep {
            info!(sandbox = %dir.path().display(), "Keeping sandbox directory");
        } else {
            debug!(sandbox = %dir.path().display(), "Sandbox created");
        }
        Ok(Self { dir, source })
    }

    /// [`Sandbox::create`] on the blocking thread pool, for use inside
    /// async jobs.
    pub async fn create_async(
        source: PathBuf,
        mode: SandboxMode,
        keep: bool,
    ) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::create(&source, mode, keep))
            .await
            .map_err(io::Error::other)?
    }

    /// Remove the sandbox on the blocking thread pool. A kept sandbox is
    /// left on disk as with a plain drop.
    pub async fn dispose(self) {
        if let Err(e) = tokio::task::spawn_blocking(move || drop(self)).await {
            warn!(error = %e, "Sandbox removal did not finish");
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The directory the sandbox mirrors.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Remove `name` inside the sandbox if present. A symlinked entry is
    /// unlinked; the file it points to is left alone.
    pub fn remove_file(&self, name: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path().join(name)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(unix)]
fn link(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(not(unix))]
fn link(src: &Path, dst: &Path) -> io::Result<()> {
    copy_recursive(src, dst)
}

fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        std::fs::create_dir_all(dst)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(src, dst)?;
    }
    Ok(())
}
