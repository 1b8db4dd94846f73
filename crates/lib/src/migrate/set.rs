//! Migration sets loaded from a directory of SQL files.
//!
//! File names follow `<version>_<name>.sql`; a leading `V`/`v` and a `__`
//! separator are accepted, so `0003_add_index.sql` and `V3__add_index.sql`
//! both declare version 3.

use std::fs;
use std::path::Path;

use tracing::debug;

use super::MigrationError;
use crate::util::hash::hash_bytes;

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
  pub version: u64,
  pub name: String,
  pub sql: String,
  /// SHA-256 of `sql`.
  pub checksum: String,
}

impl Migration {
  pub fn new(version: u64, name: impl Into<String>, sql: impl Into<String>) -> Self {
    let sql = sql.into();
    let checksum = hash_bytes(sql.as_bytes()).0;
    Self {
      version,
      name: name.into(),
      sql,
      checksum,
    }
  }
}

/// Migrations in strictly increasing version order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
  migrations: Vec<Migration>,
}

impl MigrationSet {
  /// Build a set, sorting by version and rejecting duplicates.
  pub fn new(mut migrations: Vec<Migration>) -> Result<Self, MigrationError> {
    migrations.sort_by_key(|m| m.version);
    for pair in migrations.windows(2) {
      if pair[0].version == pair[1].version {
        return Err(MigrationError::DuplicateVersion(pair[0].version));
      }
    }
    Ok(Self { migrations })
  }

  /// Load every `.sql` file in `dir`. Other files are ignored.
  pub fn load(dir: &Path) -> Result<Self, MigrationError> {
    let read_err = |source| MigrationError::Read {
      path: dir.to_path_buf(),
      source,
    };

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
      let path = entry.map_err(read_err)?.path();
      if !path.is_file() || path.extension().is_none_or(|ext| ext != "sql") {
        continue;
      }

      let (version, name) = parse_file_name(&path).ok_or_else(|| MigrationError::InvalidName(path.clone()))?;
      let sql = fs::read_to_string(&path).map_err(|source| MigrationError::Read {
        path: path.clone(),
        source,
      })?;

      debug!(version, name = %name, path = %path.display(), "found migration");
      migrations.push(Migration::new(version, name, sql));
    }

    Self::new(migrations)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Migration> {
    self.migrations.iter()
  }

  pub fn get(&self, version: u64) -> Option<&Migration> {
    self
      .migrations
      .binary_search_by_key(&version, |m| m.version)
      .ok()
      .map(|i| &self.migrations[i])
  }

  /// Migrations above `applied`, ascending.
  pub fn pending(&self, applied: u64) -> impl Iterator<Item = &Migration> {
    self.migrations.iter().filter(move |m| m.version > applied)
  }

  /// Highest version in the set, 0 when empty.
  pub fn latest_version(&self) -> u64 {
    self.migrations.last().map(|m| m.version).unwrap_or(0)
  }

  pub fn versions(&self) -> Vec<u64> {
    self.migrations.iter().map(|m| m.version).collect()
  }

  pub fn len(&self) -> usize {
    self.migrations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.migrations.is_empty()
  }
}

fn parse_file_name(path: &Path) -> Option<(u64, String)> {
  let stem = path.file_stem()?.to_str()?;
  let stem = stem.strip_prefix(['V', 'v']).unwrap_or(stem);

  let digits_end = stem.find(|c: char| !c.is_ascii_digit()).unwrap_or(stem.len());
  if digits_end == 0 {
    return None;
  }
  let version: u64 = stem[..digits_end].parse().ok()?;
  if version == 0 {
    return None;
  }

  let rest = &stem[digits_end..];
  let name = if rest.is_empty() {
    String::new()
  } else {
    rest
      .strip_prefix("__")
      .or_else(|| rest.strip_prefix(['_', '-']))?
      .to_string()
  };

  Some((version, name))
}
