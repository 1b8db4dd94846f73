//! Lock specification for the dependency set.
//!
//! The lock file (`bootseq.lock`) lists the packages the service needs, each
//! with a version constraint. It lives next to the config file.
//!
//! # Lock File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "packages": [
//!     { "name": "fastapi", "version": "^0.110" },
//!     { "name": "uvicorn", "version": "==0.29.0" }
//!   ]
//! }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use semver::VersionReq;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current lock file format version.
pub const LOCK_VERSION: u32 = 1;

/// Lock file name.
pub const LOCK_FILENAME: &str = "bootseq.lock";

/// A lock specification: ordered package constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSpecification {
  /// Lock file format version.
  pub version: u32,
  /// Locked packages in declaration order.
  pub packages: Vec<LockedPackage>,
}

/// A single package constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
  pub name: String,
  /// Version constraint (`^1.2`, `>=1, <2`, `==1.2.3`, `*`).
  pub version: String,
}

/// Errors that can occur when working with lock files.
#[derive(Debug, Error)]
pub enum LockError {
  /// Failed to read the lock file.
  #[error("failed to read lock file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to write the lock file.
  #[error("failed to write lock file: {0}")]
  Write(#[source] io::Error),

  /// Failed to parse the lock file JSON.
  #[error("failed to parse lock file: {0}")]
  Parse(#[source] serde_json::Error),

  /// Failed to serialize the lock file.
  #[error("failed to serialize lock file: {0}")]
  Serialize(#[source] serde_json::Error),

  /// Lock file version is not supported.
  #[error("unsupported lock file version {0}, expected {LOCK_VERSION}")]
  UnsupportedVersion(u32),

  #[error("package name must not be empty")]
  EmptyName,

  #[error("package '{0}' is locked more than once")]
  DuplicatePackage(String),

  #[error("invalid version constraint '{constraint}' for package '{name}': {message}")]
  InvalidConstraint {
    name: String,
    constraint: String,
    message: String,
  },
}

impl Default for LockSpecification {
  fn default() -> Self {
    Self::new()
  }
}

impl LockSpecification {
  /// Create a new empty lock specification.
  pub fn new() -> Self {
    Self {
      version: LOCK_VERSION,
      packages: Vec::new(),
    }
  }

  /// Load and validate a lock file.
  ///
  /// Unlike input locks, a missing lock file is an error: there is nothing to
  /// materialize without one.
  pub fn load(path: &Path) -> Result<Self, LockError> {
    let content = fs::read_to_string(path).map_err(|source| LockError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content)
  }

  /// Parse and validate lock file contents.
  pub fn parse(content: &str) -> Result<Self, LockError> {
    let lock: LockSpecification = serde_json::from_str(content).map_err(LockError::Parse)?;

    if lock.version != LOCK_VERSION {
      return Err(LockError::UnsupportedVersion(lock.version));
    }

    lock.validate()?;
    Ok(lock)
  }

  /// Check names are unique and non-empty and every constraint parses.
  pub fn validate(&self) -> Result<(), LockError> {
    let mut seen = BTreeSet::new();
    for package in &self.packages {
      if package.name.trim().is_empty() {
        return Err(LockError::EmptyName);
      }
      if !seen.insert(normalize_name(&package.name)) {
        return Err(LockError::DuplicatePackage(package.name.clone()));
      }
      package.requirement()?;
    }
    Ok(())
  }

  /// Save the lock file to the given path.
  pub fn save(&self, path: &Path) -> Result<(), LockError> {
    let content = serde_json::to_string_pretty(self).map_err(LockError::Serialize)?;
    fs::write(path, content).map_err(LockError::Write)?;
    Ok(())
  }

  /// Get a locked package by name.
  pub fn get(&self, name: &str) -> Option<&LockedPackage> {
    let wanted = normalize_name(name);
    self.packages.iter().find(|p| normalize_name(&p.name) == wanted)
  }

  /// Append a package constraint.
  pub fn push(&mut self, package: LockedPackage) {
    self.packages.push(package);
  }
}

impl LockedPackage {
  pub fn new(name: &str, version: &str) -> Self {
    Self {
      name: name.to_string(),
      version: version.to_string(),
    }
  }

  /// Parse the version constraint.
  ///
  /// `==X` is an exact pin; everything else is semver requirement syntax.
  pub fn requirement(&self) -> Result<VersionReq, LockError> {
    let raw = self.version.trim();
    let translated = match raw.strip_prefix("==") {
      Some(pin) => format!("={}", pin.trim()),
      None => raw.to_string(),
    };
    VersionReq::parse(&translated).map_err(|e| LockError::InvalidConstraint {
      name: self.name.clone(),
      constraint: self.version.clone(),
      message: e.to_string(),
    })
  }
}

/// Package names compare case-insensitively with `_` and `-` treated alike.
pub fn normalize_name(name: &str) -> String {
  name.trim().to_ascii_lowercase().replace('_', "-")
}
