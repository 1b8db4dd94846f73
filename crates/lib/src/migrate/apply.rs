//! Applying a migration set to a database.

use serde::Serialize;
use tracing::{info, warn};

use super::{Connector, MigrationError, MigrationSet, RetryPolicy, SchemaStore, connect_with_retry};

/// Outcome of an apply run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
  /// Marker before this run.
  pub previous_version: u64,
  /// Marker after this run.
  pub current_version: u64,
  /// Versions applied by this run, ascending.
  pub applied: Vec<u64>,
}

impl MigrationReport {
  pub fn is_noop(&self) -> bool {
    self.applied.is_empty()
  }
}

/// Marker and pending versions, without applying anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
  pub applied_version: u64,
  pub latest_version: u64,
  pub pending: Vec<u64>,
}

/// Applies migration sets through a [`Connector`].
pub struct MigrationApplier<C> {
  connector: C,
  retry: RetryPolicy,
}

impl<C: Connector> MigrationApplier<C> {
  pub fn new(connector: C, retry: RetryPolicy) -> Self {
    Self { connector, retry }
  }

  pub fn connector(&self) -> &C {
    &self.connector
  }

  /// Apply every pending migration in ascending order.
  ///
  /// Checksums of already-applied migrations are verified first; on a
  /// mismatch nothing is applied. If a migration fails, the marker stays at
  /// the last migration that committed.
  pub async fn apply(&self, set: &MigrationSet) -> Result<MigrationReport, MigrationError> {
    let mut store = connect_with_retry(&self.connector, &self.retry).await?;

    let previous_version = store.applied_version()?;
    verify_checksums(&mut store, set)?;

    if previous_version > set.latest_version() {
      warn!(
        applied = previous_version,
        latest = set.latest_version(),
        "database is ahead of the migration set; nothing to apply"
      );
    }

    let mut applied = Vec::new();
    for migration in set.pending(previous_version) {
      info!(version = migration.version, name = %migration.name, "applying migration");
      store.apply(migration)?;
      applied.push(migration.version);
    }

    let current_version = store.applied_version()?;
    if applied.is_empty() {
      info!(version = current_version, "schema is up to date");
    } else {
      info!(
        from = previous_version,
        to = current_version,
        count = applied.len(),
        "migrations applied"
      );
    }

    Ok(MigrationReport {
      previous_version,
      current_version,
      applied,
    })
  }

  /// Report the marker and pending versions.
  pub async fn status(&self, set: &MigrationSet) -> Result<MigrationStatus, MigrationError> {
    let mut store = connect_with_retry(&self.connector, &self.retry).await?;
    let applied_version = store.applied_version()?;

    Ok(MigrationStatus {
      applied_version,
      latest_version: set.latest_version(),
      pending: set.pending(applied_version).map(|m| m.version).collect(),
    })
  }
}

fn verify_checksums<S: SchemaStore>(store: &mut S, set: &MigrationSet) -> Result<(), MigrationError> {
  for (version, recorded) in store.applied_checksums()? {
    if let Some(migration) = set.get(version)
      && migration.checksum != recorded
    {
      return Err(MigrationError::ChecksumMismatch {
        version,
        recorded,
        found: migration.checksum.clone(),
      });
    }
  }
  Ok(())
}
