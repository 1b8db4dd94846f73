//! Migration applier.
//!
//! Applies every migration whose version exceeds the database's recorded
//! applied-version, in ascending order, one transaction per migration. The
//! connection is retried with bounded exponential backoff; running the
//! applier with nothing pending changes nothing.
//!
//! Backends implement [`Connector`] and [`SchemaStore`]; SQLite is provided.

mod apply;
mod retry;
mod set;
mod sqlite;


use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use apply::{MigrationApplier, MigrationReport, MigrationStatus};
pub use retry::{RetryPolicy, connect_with_retry};
pub use set::{Migration, MigrationSet};
pub use sqlite::{SqliteConnector, SqliteStore};

/// When migrations run for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationGate {
  /// Applied by `start` before the service launches.
  OnStart,
  /// Only applied when an operator invokes `migrate`.
  Manual,
}

impl fmt::Display for MigrationGate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MigrationGate::OnStart => f.write_str("on-start"),
      MigrationGate::Manual => f.write_str("manual"),
    }
  }
}

/// Frozen migration settings for an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPolicy {
  pub gate: MigrationGate,
  pub retry: RetryPolicy,
  /// Default URL used when `DATABASE_URL` is not set.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub database_url: Option<String>,
}

/// Errors that can occur while loading or applying migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
  /// The database could not be reached within the retry ceiling.
  #[error("database {endpoint} unreachable after {attempts} attempt(s): {message}")]
  Unreachable {
    endpoint: String,
    attempts: u32,
    message: String,
  },

  /// A migration failed and was rolled back.
  #[error("migration {version} ({name}) failed and was rolled back: {message}")]
  Failed {
    version: u64,
    name: String,
    message: String,
  },

  /// An applied migration no longer matches its source.
  #[error("migration {version} was modified after being applied (recorded {recorded}, found {found})")]
  ChecksumMismatch {
    version: u64,
    recorded: String,
    found: String,
  },

  #[error("duplicate migration version {0}")]
  DuplicateVersion(u64),

  #[error("invalid migration file name: {}", .0.display())]
  InvalidName(PathBuf),

  #[error("failed to read migrations from {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Reading the applied-version marker failed.
  #[error("database error: {0}")]
  Database(String),

  #[error("unsupported database url '{0}' (expected sqlite://<path>)")]
  UnsupportedUrl(String),
}

/// Replace the password in a URL's userinfo with `***`.
pub fn redact_url(url: &str) -> String {
  let Some((scheme, rest)) = url.split_once("://") else {
    return url.to_string();
  };
  let authority_end = rest.find('/').unwrap_or(rest.len());
  let (authority, tail) = rest.split_at(authority_end);
  match authority.rsplit_once('@') {
    Some((userinfo, host)) => {
      let user = userinfo.split(':').next().unwrap_or(userinfo);
      if userinfo.contains(':') {
        format!("{}://{}:***@{}{}", scheme, user, host, tail)
      } else {
        format!("{}://{}@{}{}", scheme, user, host, tail)
      }
    }
    None => url.to_string(),
  }
}

/// A failed connection attempt.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConnectError(pub String);

/// Opens connections to a migration target.
pub trait Connector {
  type Store: SchemaStore;

  /// Endpoint description for logs and errors. Must not contain credentials.
  fn endpoint(&self) -> String;

  fn connect(&self) -> Result<Self::Store, ConnectError>;
}

/// An open connection that tracks and applies migrations.
pub trait SchemaStore {
  /// Highest applied version, 0 when nothing has been applied.
  fn applied_version(&mut self) -> Result<u64, MigrationError>;

  /// Recorded checksums of applied migrations, keyed by version.
  fn applied_checksums(&mut self) -> Result<BTreeMap<u64, String>, MigrationError>;

  /// Apply one migration and record it, atomically.
  fn apply(&mut self, migration: &Migration) -> Result<(), MigrationError>;
}
