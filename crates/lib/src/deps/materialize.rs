//! Materializing a resolved environment on disk.
//!
//! Every run starts from an empty directory. The layout on success:
//!
//! ```text
//! <env_dir>/
//!   requirements.txt   # pinned name==version lines
//!   ...                # whatever the installer produced
//!   environment.json   # ResolvedEnvironment, written last
//! ```
//!
//! `environment.json` is the completion marker: a directory without it is
//! never a valid environment. On failure the directory is removed.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::index::{IndexError, PackageIndex};
use super::lock::LockSpecification;
use super::resolve::{ResolveError, ResolvedEnvironment, resolve};
use crate::exec::{ExecError, run_shell};

/// Pinned requirements file name.
pub const REQUIREMENTS_FILENAME: &str = "requirements.txt";

/// Completion marker written after a successful install.
pub const ENVIRONMENT_FILENAME: &str = "environment.json";

/// Errors from materializing a dependency set.
#[derive(Debug, Error)]
pub enum MaterializeError {
  #[error("dependency resolution failed: {0}")]
  Resolve(#[from] ResolveError),

  #[error("installer failed: {0}")]
  Installer(#[from] ExecError),

  #[error("environment I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize environment record: {0}")]
  Serialize(#[from] serde_json::Error),
}

impl MaterializeError {
  /// Whether the package source was unreachable, as opposed to the set
  /// being unsatisfiable or uninstallable.
  pub fn is_network(&self) -> bool {
    matches!(
      self,
      MaterializeError::Resolve(ResolveError::Index(IndexError::Unreachable { .. }))
    )
  }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> MaterializeError + '_ {
  move |source| MaterializeError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Resolves a lock against an index and installs the result.
#[derive(Debug, Clone)]
pub struct Materializer<I> {
  index: I,
  installer: Option<String>,
  shell: Option<String>,
}

impl<I: PackageIndex> Materializer<I> {
  pub fn new(index: I) -> Self {
    Self {
      index,
      installer: None,
      shell: None,
    }
  }

  /// Opaque installer command. Runs inside the environment directory with
  /// `$out` (the directory) and `$requirements` (the pinned file) set.
  pub fn with_installer(mut self, installer: Option<String>) -> Self {
    self.installer = installer;
    self
  }

  pub fn with_shell(mut self, shell: Option<String>) -> Self {
    self.shell = shell;
    self
  }

  pub fn index(&self) -> &I {
    &self.index
  }

  /// Resolve `lock` and install it into `env_dir`, replacing anything there.
  ///
  /// Resolution happens before the directory is touched, so an unsatisfiable
  /// lock leaves no trace. Any later failure removes `env_dir`.
  pub async fn materialize(
    &self,
    lock: &LockSpecification,
    env_dir: &Path,
  ) -> Result<ResolvedEnvironment, MaterializeError> {
    info!(source = %self.index.describe(), packages = lock.packages.len(), "resolving dependencies");
    let env = resolve(lock, &self.index).await?;

    match self.install(&env, env_dir).await {
      Ok(()) => {
        info!(dir = %env_dir.display(), digest = %env.digest.short(12), "environment materialized");
        Ok(env)
      }
      Err(err) => {
        warn!(dir = %env_dir.display(), error = %err, "materialization failed, removing environment");
        if let Err(e) = tokio::fs::remove_dir_all(env_dir).await
          && e.kind() != io::ErrorKind::NotFound
        {
          warn!(dir = %env_dir.display(), error = %e, "failed to remove partial environment");
        }
        Err(err)
      }
    }
  }

  async fn install(&self, env: &ResolvedEnvironment, env_dir: &Path) -> Result<(), MaterializeError> {
    match tokio::fs::remove_dir_all(env_dir).await {
      Ok(()) => debug!(dir = %env_dir.display(), "removed previous environment"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(io_err(env_dir)(e)),
    }
    tokio::fs::create_dir_all(env_dir).await.map_err(io_err(env_dir))?;

    let requirements = env_dir.join(REQUIREMENTS_FILENAME);
    tokio::fs::write(&requirements, env.requirements())
      .await
      .map_err(io_err(&requirements))?;

    if let Some(installer) = &self.installer {
      let mut vars = BTreeMap::new();
      vars.insert("out".to_string(), env_dir.to_string_lossy().to_string());
      vars.insert("requirements".to_string(), requirements.to_string_lossy().to_string());
      run_shell(installer, &vars, env_dir, self.shell.as_deref()).await?;
    } else {
      debug!("no installer configured, pinned requirements only");
    }

    let marker = env_dir.join(ENVIRONMENT_FILENAME);
    let record = serde_json::to_string_pretty(env)?;
    tokio::fs::write(&marker, record).await.map_err(io_err(&marker))?;

    Ok(())
  }
}

/// Read the environment record from a materialized directory.
///
/// Returns `None` if the directory was never completed.
pub fn read_environment(env_dir: &Path) -> Result<Option<ResolvedEnvironment>, MaterializeError> {
  let marker = env_dir.join(ENVIRONMENT_FILENAME);
  let content = match std::fs::read_to_string(&marker) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(io_err(&marker)(e)),
  };
  Ok(Some(serde_json::from_str(&content)?))
}
