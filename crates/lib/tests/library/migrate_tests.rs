//! Migration applier against a real SQLite database.

use std::fs;
use std::time::Duration;

use bootseq_lib::migrate::{
  Connector, MigrationApplier, MigrationError, MigrationSet, RetryPolicy, SchemaStore, SqliteConnector,
};
use tempfile::TempDir;

fn retry() -> RetryPolicy {
  RetryPolicy {
    max_attempts: 2,
    initial_delay: Duration::from_millis(1),
    max_delay: Duration::from_millis(2),
  }
}

fn write_migrations(dir: &std::path::Path, files: &[(&str, &str)]) -> MigrationSet {
  fs::create_dir_all(dir).unwrap();
  for (name, sql) in files {
    fs::write(dir.join(name), sql).unwrap();
  }
  MigrationSet::load(dir).unwrap()
}

fn table_exists(connector: &SqliteConnector, table: &str) -> bool {
  let store = connector.connect().unwrap();
  store
    .connection()
    .query_row(
      "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
      [table],
      |row| row.get::<_, i64>(0),
    )
    .unwrap()
    > 0
}

const V1: (&str, &str) = ("0001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);");
const V2: (&str, &str) = ("0002_posts.sql", "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER);");
const V3: (&str, &str) = ("0003_tags.sql", "CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT);");

#[tokio::test]
async fn applies_only_versions_above_marker() {
  let temp = TempDir::new().unwrap();
  let connector = SqliteConnector::new(temp.path().join("app.db"));
  let applier = MigrationApplier::new(connector.clone(), retry());

  let first = write_migrations(&temp.path().join("m"), &[V1, V2]);
  applier.apply(&first).await.unwrap();

  let all = write_migrations(&temp.path().join("m"), &[V1, V2, V3]);
  let report = applier.apply(&all).await.unwrap();

  assert_eq!(report.previous_version, 2);
  assert_eq!(report.applied, vec![3]);
  assert_eq!(report.current_version, 3);
  assert!(table_exists(&connector, "tags"));

  let again = applier.apply(&all).await.unwrap();
  assert!(again.is_noop());
  assert_eq!(again.current_version, 3);
}

#[tokio::test]
async fn applying_twice_equals_applying_once() {
  let temp = TempDir::new().unwrap();
  let set = write_migrations(&temp.path().join("m"), &[V1, V2, V3]);

  let once = MigrationApplier::new(SqliteConnector::new(temp.path().join("once.db")), retry());
  let twice = MigrationApplier::new(SqliteConnector::new(temp.path().join("twice.db")), retry());

  let once_report = once.apply(&set).await.unwrap();
  twice.apply(&set).await.unwrap();
  let twice_report = twice.apply(&set).await.unwrap();

  assert_eq!(once_report.current_version, twice_report.current_version);
}

#[tokio::test]
async fn failure_leaves_marker_at_last_committed() {
  let temp = TempDir::new().unwrap();
  let connector = SqliteConnector::new(temp.path().join("app.db"));
  let set = write_migrations(
    &temp.path().join("m"),
    &[
      V1,
      ("0002_half.sql", "CREATE TABLE half (id INTEGER); INSERT INTO nowhere VALUES (1);"),
      V3,
    ],
  );

  let result = MigrationApplier::new(connector.clone(), retry()).apply(&set).await;

  assert!(matches!(result, Err(MigrationError::Failed { version: 2, .. })));
  let mut store = connector.connect().unwrap();
  assert_eq!(store.applied_version().unwrap(), 1);
  assert!(!table_exists(&connector, "half"));
  assert!(!table_exists(&connector, "tags"));
}

#[tokio::test]
async fn edited_migration_is_rejected() {
  let temp = TempDir::new().unwrap();
  let connector = SqliteConnector::new(temp.path().join("app.db"));
  let applier = MigrationApplier::new(connector, retry());
  let dir = temp.path().join("m");

  applier.apply(&write_migrations(&dir, &[V1])).await.unwrap();
  let edited = write_migrations(&dir, &[("0001_users.sql", "CREATE TABLE users (id INTEGER);"), V2]);

  let result = applier.apply(&edited).await;

  assert!(matches!(result, Err(MigrationError::ChecksumMismatch { version: 1, .. })));
}

#[tokio::test]
async fn unreachable_database_exhausts_retries() {
  let temp = TempDir::new().unwrap();
  let url = format!("sqlite://{}", temp.path().join("missing/app.db").display());
  let applier = MigrationApplier::new(SqliteConnector::from_url(&url).unwrap(), retry());
  let set = write_migrations(&temp.path().join("m"), &[V1]);

  let result = applier.apply(&set).await;

  assert!(matches!(result, Err(MigrationError::Unreachable { attempts: 2, .. })));
}

#[tokio::test]
async fn status_does_not_apply() {
  let temp = TempDir::new().unwrap();
  let connector = SqliteConnector::new(temp.path().join("app.db"));
  let set = write_migrations(&temp.path().join("m"), &[V1, V2]);
  let applier = MigrationApplier::new(connector.clone(), retry());

  let status = applier.status(&set).await.unwrap();

  assert_eq!(status.applied_version, 0);
  assert_eq!(status.pending, vec![1, 2]);
  assert!(!table_exists(&connector, "users"));
}
