//! Migrate and status command integration tests.

use predicates::prelude::*;

use super::common::{ADMIN_CONFIG, TestEnv};

fn with_migrations(env: &TestEnv) {
  env.write_file("migrations/0001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");
  env.write_file("migrations/0002_email.sql", "ALTER TABLE users ADD COLUMN email TEXT;");
}

#[test]
fn migrate_directory_is_idempotent() {
  let env = TestEnv::empty();
  with_migrations(&env);

  env
    .bootseq_cmd()
    .args(["migrate", "--dir", "migrations", "--database-url"])
    .arg(env.database_url())
    .assert()
    .success()
    .stdout(predicate::str::contains("Migrated 0 -> 2"));

  env
    .bootseq_cmd()
    .args(["migrate", "--dir", "migrations", "--database-url"])
    .arg(env.database_url())
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to apply"));
}

#[test]
fn migrate_reads_database_url_from_environment() {
  let env = TestEnv::empty();
  with_migrations(&env);

  env
    .bootseq_cmd()
    .args(["migrate", "--dir", "migrations"])
    .env("DATABASE_URL", env.database_url())
    .assert()
    .success();

  assert!(env.path().join("app.db").exists());
}

#[test]
fn migrate_without_database_url_is_a_config_error() {
  let env = TestEnv::empty();
  with_migrations(&env);

  env
    .bootseq_cmd()
    .args(["migrate", "--dir", "migrations"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("no database url"));
}

#[test]
fn migrate_broken_migration_exits_with_migration_code() {
  let env = TestEnv::empty();
  env.write_file("migrations/0001_broken.sql", "CREATE TABLE (;");

  env
    .bootseq_cmd()
    .args(["migrate", "--dir", "migrations", "--database-url"])
    .arg(env.database_url())
    .assert()
    .code(20)
    .stderr(predicate::str::contains("MigrationError"));
}

#[test]
fn migrate_unreachable_database_exits_with_network_code() {
  // Config supplies a fast retry policy.
  let env = TestEnv::project(ADMIN_CONFIG);
  with_migrations(&env);

  env
    .bootseq_cmd()
    .args(["migrate", "--dir", "migrations", "--database-url"])
    .arg(env.unreachable_database_url())
    .assert()
    .code(21);
}

#[test]
fn admin_context_migrates_by_hand() {
  let env = TestEnv::project(ADMIN_CONFIG);
  with_migrations(&env);

  env.bootseq_cmd().arg("build").assert().success();
  env
    .bootseq_cmd()
    .arg("migrate")
    .env("DATABASE_URL", env.database_url())
    .assert()
    .success()
    .stdout(predicate::str::contains("Applied: 1, 2"));
}

#[test]
fn status_reports_pending_versions() {
  let env = TestEnv::empty();
  with_migrations(&env);

  env
    .bootseq_cmd()
    .args(["status", "--dir", "migrations", "--json", "--database-url"])
    .arg(env.database_url())
    .assert()
    .success()
    .stdout(predicate::str::contains("\"pending\": [\n    1,\n    2\n  ]"))
    .stdout(predicate::str::contains("\"applied_version\": 0"));
}

#[test]
fn status_redacts_credentials() {
  let env = TestEnv::empty();
  with_migrations(&env);

  env
    .bootseq_cmd()
    .args(["status", "--dir", "migrations", "--database-url", "postgres://app:hunter2@db/app"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("hunter2").not());
}

#[test]
fn database_ahead_of_migrations_warns() {
  let env = TestEnv::empty();
  with_migrations(&env);
  env
    .bootseq_cmd()
    .args(["migrate", "--dir", "migrations", "--database-url"])
    .arg(env.database_url())
    .assert()
    .success();
  std::fs::remove_file(env.path().join("migrations/0002_email.sql")).unwrap();

  env
    .bootseq_cmd()
    .args(["migrate", "--dir", "migrations", "--database-url"])
    .arg(env.database_url())
    .assert()
    .success()
    .stderr(predicate::str::contains("Database is at version 2 but the newest migration here is 1"));

  env
    .bootseq_cmd()
    .args(["status", "--dir", "migrations", "--database-url"])
    .arg(env.database_url())
    .assert()
    .success()
    .stderr(predicate::str::contains("Database is at version 2"));
}
