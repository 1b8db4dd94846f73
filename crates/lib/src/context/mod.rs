//! The build context: staged code, migration assets and the materialized
//! environment for one image.
//!
//! # Layout
//!
//! ```text
//! <context>/
//!   .lock          # advisory lock (exclusive while building)
//!   env/           # materialized dependency environment
//!   app/           # staged application code
//!   migrations/    # staged migration assets (when included)
//!   context.json   # ContextRecord, written when the build completes
//! ```
//!
//! A [`BuildContext`] is owned exclusively by the build. Sealing it writes
//! `context.json` and yields a [`StagedContext`], the read-only view runtime
//! stages work from.

mod lock;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::deps::ResolvedEnvironment;
use crate::util::hash::{ContentHash, hash_bytes, hash_lines};
use crate::variant::ImagePlan;

pub use lock::{ContextLock, ContextLockError, LockHolder, LockMode};

pub const RECORD_FILENAME: &str = "context.json";
pub const RECORD_VERSION: u32 = 1;

const ENV_DIR: &str = "env";
const APP_DIR: &str = "app";
const MIGRATIONS_DIR: &str = "migrations";

#[derive(Debug, Error)]
pub enum ContextError {
  #[error(transparent)]
  Lock(#[from] ContextLockError),

  #[error("source tree does not exist: {0}")]
  MissingSource(PathBuf),

  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to walk {path}: {message}")]
  Walk { path: PathBuf, message: String },

  #[error("build context at {0} has not been sealed; run `bootseq build` first")]
  NotSealed(PathBuf),

  #[error("failed to parse context record {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize context record: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported context record version {0}, expected {RECORD_VERSION}")]
  UnsupportedVersion(u32),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ContextError + '_ {
  move |source| ContextError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Frozen description of a completed build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
  pub version: u32,
  pub plan: ImagePlan,
  pub environment: ResolvedEnvironment,
  /// Digest of the staged application tree.
  pub code_digest: ContentHash,
  pub migrations_staged: bool,
  pub staged_at_unix: u64,
}

impl ContextRecord {
  pub fn new(
    plan: ImagePlan,
    environment: ResolvedEnvironment,
    code_digest: ContentHash,
    migrations_staged: bool,
  ) -> Self {
    Self {
      version: RECORD_VERSION,
      plan,
      environment,
      code_digest,
      migrations_staged,
      staged_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
    }
  }
}

/// Result of copying one tree into the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedTree {
  pub files: usize,
  pub digest: ContentHash,
}

/// A context under construction, held exclusively.
#[derive(Debug)]
pub struct BuildContext {
  root: PathBuf,
  _lock: ContextLock,
}

impl BuildContext {
  /// Take exclusive ownership of `root`, creating it if needed.
  ///
  /// Any previous record is removed first, so an interrupted build never
  /// leaves a context that looks sealed.
  pub fn create(root: &Path, command: &str) -> Result<Self, ContextError> {
    let lock = ContextLock::acquire(root, LockMode::Exclusive, command)?;
    let root = dunce::canonicalize(root).map_err(io_err(root))?;

    let record = root.join(RECORD_FILENAME);
    match fs::remove_file(&record) {
      Ok(()) => debug!(path = %record.display(), "removed previous context record"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(io_err(&record)(e)),
    }

    info!(root = %root.display(), "build context acquired");
    Ok(Self { root, _lock: lock })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn env_dir(&self) -> PathBuf {
    self.root.join(ENV_DIR)
  }

  pub fn app_dir(&self) -> PathBuf {
    self.root.join(APP_DIR)
  }

  pub fn migrations_dir(&self) -> PathBuf {
    self.root.join(MIGRATIONS_DIR)
  }

  /// Replace `dest` with a copy of `src`, skipping entries named in `exclude`.
  pub fn stage_tree(&self, src: &Path, dest: &Path, exclude: &[String]) -> Result<StagedTree, ContextError> {
    if !src.is_dir() {
      return Err(ContextError::MissingSource(src.to_path_buf()));
    }
    clear_dir(dest)?;
    let staged = copy_tree(src, dest, exclude)?;
    info!(
      src = %src.display(),
      dest = %dest.display(),
      files = staged.files,
      digest = %staged.digest.short(12),
      "staged tree"
    );
    Ok(staged)
  }

  /// Remove `dest` if present. Used when migration assets are not staged.
  pub fn clear(&self, dest: &Path) -> Result<(), ContextError> {
    clear_dir(dest)
  }

  /// Write the record and hand the context over to runtime stages.
  pub fn seal(self, record: ContextRecord) -> Result<StagedContext, ContextError> {
    let path = self.root.join(RECORD_FILENAME);
    let content = serde_json::to_string_pretty(&record).map_err(ContextError::Serialize)?;
    fs::write(&path, content).map_err(io_err(&path))?;

    info!(root = %self.root.display(), variant = %record.plan.variant, "build context sealed");
    Ok(StagedContext {
      root: self.root,
      record,
      _lock: self._lock,
    })
  }
}

/// A sealed context, read-only to the stages that use it.
#[derive(Debug)]
pub struct StagedContext {
  root: PathBuf,
  record: ContextRecord,
  _lock: ContextLock,
}

impl StagedContext {
  /// Open a sealed context under a shared lock.
  pub fn open(root: &Path, command: &str) -> Result<Self, ContextError> {
    if !root.join(RECORD_FILENAME).exists() {
      return Err(ContextError::NotSealed(root.to_path_buf()));
    }
    let lock = ContextLock::acquire(root, LockMode::Shared, command)?;
    let root = dunce::canonicalize(root).map_err(io_err(root))?;

    let path = root.join(RECORD_FILENAME);
    let content = fs::read_to_string(&path).map_err(io_err(&path))?;
    let record: ContextRecord =
      serde_json::from_str(&content).map_err(|source| ContextError::Parse { path: path.clone(), source })?;
    if record.version != RECORD_VERSION {
      return Err(ContextError::UnsupportedVersion(record.version));
    }

    debug!(root = %root.display(), variant = %record.plan.variant, "opened staged context");
    Ok(Self {
      root,
      record,
      _lock: lock,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn record(&self) -> &ContextRecord {
    &self.record
  }

  pub fn plan(&self) -> &ImagePlan {
    &self.record.plan
  }

  pub fn env_dir(&self) -> PathBuf {
    self.root.join(ENV_DIR)
  }

  pub fn app_dir(&self) -> PathBuf {
    self.root.join(APP_DIR)
  }

  /// Staged migration assets, if the build included them.
  pub fn migrations_dir(&self) -> Option<PathBuf> {
    self.record.migrations_staged.then(|| self.root.join(MIGRATIONS_DIR))
  }
}

fn clear_dir(dir: &Path) -> Result<(), ContextError> {
  match fs::remove_dir_all(dir) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(io_err(dir)(e)),
  }
}

/// Copy `src` into `dest`, returning the file count and a digest over
/// relative paths and file contents. Entries are visited in name order.
fn copy_tree(src: &Path, dest: &Path, exclude: &[String]) -> Result<StagedTree, ContextError> {
  let mut lines = Vec::new();
  let mut files = 0;

  let walker = WalkDir::new(src)
    .follow_links(true)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| {
      e.depth() == 0
        || e
          .file_name()
          .to_str()
          .map(|name| !exclude.iter().any(|x| x == name))
          .unwrap_or(true)
    });

  for entry in walker {
    let entry = entry.map_err(|e| ContextError::Walk {
      path: src.to_path_buf(),
      message: e.to_string(),
    })?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(rel);
    let rel_name = rel.to_string_lossy().replace('\\', "/");

    let file_type = entry.file_type();
    if file_type.is_dir() {
      fs::create_dir_all(&target).map_err(io_err(&target))?;
      if !rel_name.is_empty() {
        lines.push(format!("D:{}", rel_name));
      }
    } else if file_type.is_file() {
      let content = fs::read(entry.path()).map_err(io_err(entry.path()))?;
      fs::write(&target, &content).map_err(io_err(&target))?;
      lines.push(format!("F:{}:{}", rel_name, hash_bytes(&content)));
      files += 1;
    } else {
      debug!(path = %entry.path().display(), "skipping special file");
    }
  }

  Ok(StagedTree {
    files,
    digest: hash_lines(lines),
  })
}
