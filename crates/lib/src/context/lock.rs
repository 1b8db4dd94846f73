//! Advisory locks on a build context directory.
//!
//! `build` takes the lock exclusively and records who holds it; `start`,
//! `migrate` and `status` take it shared. A second build of the same context,
//! or a build underneath a running start, fails at once instead of waiting.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// The exclusive holder, as recorded in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub command: String,
  pub started_at_unix: u64,
}

impl LockHolder {
  fn current(command: &str) -> Self {
    Self {
      pid: std::process::id(),
      command: command.to_string(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
    }
  }
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let started = UNIX_EPOCH + Duration::from_secs(self.started_at_unix);
    write!(
      f,
      "`{}` (PID {}, started {})",
      self.command,
      self.pid,
      humantime::format_rfc3339_seconds(started)
    )
  }
}

#[derive(Debug, Error)]
pub enum ContextLockError {
  #[error(
    "build context is in use by {}; if no bootseq process is running, remove {}",
    holder.as_ref().map_or_else(|| "another process".to_string(), ToString::to_string),
    lock_path.display()
  )]
  Busy {
    holder: Option<LockHolder>,
    lock_path: PathBuf,
  },

  #[error("failed to lock {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A held lock on a context directory. Released when dropped.
#[derive(Debug)]
pub struct ContextLock {
  file: File,
  lock_path: PathBuf,
}

impl ContextLock {
  /// Take the lock on `dir` without blocking, creating the directory if needed.
  pub fn acquire(dir: &Path, mode: LockMode, command: &str) -> Result<Self, ContextLockError> {
    let lock_path = dir.join(LOCK_FILENAME);
    let io_err = |source| ContextLockError::Io {
      path: lock_path.clone(),
      source,
    };

    std::fs::create_dir_all(dir).map_err(io_err)?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(io_err)?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(ContextLockError::Busy {
          holder: read_holder(&lock_path),
          lock_path: lock_path.clone(),
        });
      }
      Err(e) => return Err(io_err(e)),
    }

    if mode == LockMode::Exclusive {
      record(&file, &LockHolder::current(command)).map_err(io_err)?;
    }

    debug!(path = %lock_path.display(), mode = ?mode, "context lock acquired");
    Ok(Self { file, lock_path })
  }

  /// The recorded exclusive holder, read through the held handle.
  pub fn holder(&self) -> Option<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn record(file: &File, holder: &LockHolder) -> io::Result<()> {
  file.set_len(0)?;
  let mut writer = file;
  writer.seek(SeekFrom::Start(0))?;
  serde_json::to_writer(&mut writer, holder).map_err(io::Error::other)?;
  writer.flush()
}

/// Best effort: a holder that has not written its record yet reads as `None`.
fn read_holder(lock_path: &Path) -> Option<LockHolder> {
  let contents = std::fs::read_to_string(lock_path).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  flock(file, operation).map_err(io::Error::from)
}

/// Contention surfaces as `ERROR_LOCK_VIOLATION`; it is mapped to `WouldBlock`
/// so both platforms report it the same way.
#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: the handle is owned by `file` and stays open for the call; a
  // zeroed OVERLAPPED locks from offset 0.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
  };
  if locked != 0 {
    return Ok(());
  }

  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    Err(io::ErrorKind::WouldBlock.into())
  } else {
    Err(err)
  }
}
