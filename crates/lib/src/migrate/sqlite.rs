//! SQLite migration backend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use super::{ConnectError, Connector, Migration, MigrationError, SchemaStore, redact_url};

const MIGRATIONS_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  checksum TEXT NOT NULL,
  applied_at INTEGER NOT NULL
)";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to a SQLite database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConnector {
  path: PathBuf,
}

impl SqliteConnector {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Parse `sqlite://relative/path` or `sqlite:///absolute/path`.
  ///
  /// A driver suffix on the scheme (`sqlite+aiosqlite://`) is accepted and ignored.
  pub fn from_url(url: &str) -> Result<Self, MigrationError> {
    let unsupported = || MigrationError::UnsupportedUrl(redact_url(url));

    let (scheme, rest) = url.split_once("://").ok_or_else(unsupported)?;
    let base_scheme = scheme.split('+').next().unwrap_or(scheme);
    if base_scheme != "sqlite" || rest.is_empty() {
      return Err(unsupported());
    }

    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == "/" {
      return Err(unsupported());
    }

    Ok(Self::new(path))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Connector for SqliteConnector {
  type Store = SqliteStore;

  fn endpoint(&self) -> String {
    format!("sqlite://{}", self.path.display())
  }

  fn connect(&self) -> Result<SqliteStore, ConnectError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| ConnectError(e.to_string()))?;
    conn
      .busy_timeout(BUSY_TIMEOUT)
      .map_err(|e| ConnectError(e.to_string()))?;
    conn
      .execute_batch(MIGRATIONS_TABLE_DDL)
      .map_err(|e| ConnectError(e.to_string()))?;

    debug!(path = %self.path.display(), "opened sqlite database");
    Ok(SqliteStore { conn })
  }
}

/// An open SQLite connection.
pub struct SqliteStore {
  conn: Connection,
}

impl SqliteStore {
  /// The underlying connection.
  pub fn connection(&self) -> &Connection {
    &self.conn
  }
}

fn db_err(err: rusqlite::Error) -> MigrationError {
  MigrationError::Database(err.to_string())
}

impl SchemaStore for SqliteStore {
  fn applied_version(&mut self) -> Result<u64, MigrationError> {
    let version: i64 = self
      .conn
      .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
        row.get(0)
      })
      .map_err(db_err)?;
    Ok(version.max(0) as u64)
  }

  fn applied_checksums(&mut self) -> Result<BTreeMap<u64, String>, MigrationError> {
    let mut stmt = self
      .conn
      .prepare("SELECT version, checksum FROM schema_migrations ORDER BY version")
      .map_err(db_err)?;
    let rows = stmt
      .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
      .map_err(db_err)?;

    let mut checksums = BTreeMap::new();
    for row in rows {
      let (version, checksum) = row.map_err(db_err)?;
      checksums.insert(version.max(0) as u64, checksum);
    }
    Ok(checksums)
  }

  fn apply(&mut self, migration: &Migration) -> Result<(), MigrationError> {
    let failed = |err: rusqlite::Error| MigrationError::Failed {
      version: migration.version,
      name: migration.name.clone(),
      message: err.to_string(),
    };

    let applied_at = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs() as i64;

    // Dropping the transaction without commit rolls it back.
    let tx = self.conn.transaction().map_err(failed)?;
    tx.execute_batch(&migration.sql).map_err(failed)?;
    tx.execute(
      "INSERT INTO schema_migrations (version, name, checksum, applied_at) VALUES (?1, ?2, ?3, ?4)",
      params![migration.version as i64, migration.name, migration.checksum, applied_at],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)?;

    Ok(())
  }
}
