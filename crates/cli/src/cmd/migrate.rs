//! Implementation of the `bootseq migrate` and `bootseq status` commands.
//!
//! Both work against either a sealed build context (default) or a plain
//! directory of migration files. The database URL comes from
//! `--database-url`, then `DATABASE_URL`, then `migrations.database_url`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use bootseq_lib::config::{BuildConfig, ConfigError, RuntimeConfig};
use bootseq_lib::consts::DEFAULT_CONTEXT_DIR;
use bootseq_lib::context::StagedContext;
use bootseq_lib::migrate::{
  MigrationApplier, MigrationSet, MigrationStatus, RetryPolicy, SqliteConnector, redact_url,
};
use bootseq_lib::sequence::{BootstrapError, Stage};

use super::{load_config, runtime};
use crate::output::{
  format_duration, format_versions, print_info, print_json, print_stat, print_success, print_warning,
};

/// Where migrations and database settings come from.
#[derive(Debug, Args)]
pub struct MigrationTarget {
  /// Sealed build context to read migrations from
  #[arg(long, conflicts_with = "dir")]
  context: Option<PathBuf>,

  /// Directory of migration files (settings from --config when it exists)
  #[arg(long)]
  dir: Option<PathBuf>,

  /// Database URL (overrides DATABASE_URL)
  #[arg(long)]
  database_url: Option<String>,
}

/// A resolved migration target.
struct Target {
  set: MigrationSet,
  retry: RetryPolicy,
  url: String,
  // Held so the context cannot be rebuilt while migrating.
  _context: Option<StagedContext>,
}

impl MigrationTarget {
  fn resolve(&self, config_path: &Path) -> Result<Target> {
    let (dir, retry, default_url, context) = match &self.dir {
      Some(dir) => {
        let config = if config_path.exists() {
          Some(load_config(config_path)?)
        } else {
          None
        };
        let (retry, url) = settings(config.as_ref());
        (dir.clone(), retry, url, None)
      }
      None => {
        let root = self
          .context
          .clone()
          .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTEXT_DIR));
        let staged = StagedContext::open(&root, "bootseq migrate")
          .map_err(|e| BootstrapError::new(Stage::Staging, e))
          .with_context(|| format!("Failed to open build context: {}", root.display()))?;
        let dir = staged.migrations_dir().ok_or_else(|| {
          BootstrapError::new(
            Stage::Migration,
            ConfigError::Invalid("this image was built without migration assets".to_string()),
          )
        })?;
        let policy = &staged.plan().migrations;
        let (retry, url) = (policy.retry.clone(), policy.database_url.clone());
        (dir, retry, url, Some(staged))
      }
    };

    let set = MigrationSet::load(&dir)
      .map_err(|e| BootstrapError::new(Stage::Migration, e))
      .with_context(|| format!("Failed to load migrations from {}", dir.display()))?;

    let runtime = RuntimeConfig::from_env();
    let url = self
      .database_url
      .clone()
      .or_else(|| runtime.database_url_or(default_url.as_deref()))
      .ok_or_else(|| {
        BootstrapError::new(
          Stage::Migration,
          ConfigError::Invalid("no database url (use --database-url or set DATABASE_URL)".to_string()),
        )
      })?;

    Ok(Target {
      set,
      retry,
      url,
      _context: context,
    })
  }
}

fn settings(config: Option<&BuildConfig>) -> (RetryPolicy, Option<String>) {
  match config {
    Some(config) => (
      RetryPolicy {
        max_attempts: config.migrations.max_attempts,
        initial_delay: config.migrations.initial_backoff,
        max_delay: config.migrations.max_backoff,
      },
      config.migrations.database_url.clone(),
    ),
    None => (RetryPolicy::default(), None),
  }
}

fn applier(target: &Target) -> Result<MigrationApplier<SqliteConnector>> {
  let connector = SqliteConnector::from_url(&target.url).map_err(|e| BootstrapError::new(Stage::Migration, e))?;
  Ok(MigrationApplier::new(connector, target.retry.clone()))
}

pub fn cmd_migrate(config_path: &Path, target: &MigrationTarget) -> Result<()> {
  let target = target.resolve(config_path)?;
  info!(database = %redact_url(&target.url), migrations = target.set.len(), "running migrations");
  let applier = applier(&target)?;
  let started = Instant::now();

  let rt = runtime()?;
  let report = rt
    .block_on(applier.apply(&target.set))
    .map_err(|e| BootstrapError::new(Stage::Migration, e))
    .context("Migration failed")?;

  if report.current_version > target.set.latest_version() {
    print_warning(&ahead_message(report.current_version, target.set.latest_version()));
  } else if report.is_noop() {
    print_info(&format!(
      "Nothing to apply; schema is at version {}",
      report.current_version
    ));
  } else {
    print_success(&format!(
      "Migrated {} -> {}",
      report.previous_version, report.current_version
    ));
    print_stat("Applied", &format_versions(&report.applied));
  }
  print_stat("Took", &format_duration(started.elapsed()));
  Ok(())
}

fn ahead_message(applied: u64, latest: u64) -> String {
  format!(
    "Database is at version {} but the newest migration here is {}; nothing applied",
    applied, latest
  )
}

#[derive(Serialize)]
struct StatusOutput<'a> {
  database: String,
  #[serde(flatten)]
  status: &'a MigrationStatus,
}

pub fn cmd_status(config_path: &Path, target: &MigrationTarget, json: bool) -> Result<()> {
  let target = target.resolve(config_path)?;
  let applier = applier(&target)?;

  let rt = runtime()?;
  let status = rt
    .block_on(applier.status(&target.set))
    .map_err(|e| BootstrapError::new(Stage::Migration, e))
    .context("Failed to read migration status")?;

  if json {
    return print_json(&StatusOutput {
      database: redact_url(&target.url),
      status: &status,
    });
  }

  if status.applied_version > status.latest_version {
    print_warning(&ahead_message(status.applied_version, status.latest_version));
  }
  print_success(&format!("Database {}", redact_url(&target.url)));
  print_stat("Applied version", &status.applied_version.to_string());
  print_stat("Latest version", &status.latest_version.to_string());
  print_stat("Pending", &format_versions(&status.pending));
  Ok(())
}
