//! Section types for `bootseq.toml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_HOST;
use crate::deps::lock::LOCK_FILENAME;
use crate::launch::EventLoop;
use crate::migrate::MigrationGate;
use crate::variant::{DeploymentVariant, Toggle};

/// The complete build configuration.
///
/// Paths are stored as written; use [`super::BuildConfig::resolve`] to anchor
/// them at the config file's directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
  /// Image shape to produce.
  pub variant: DeploymentVariant,

  #[serde(default)]
  pub dependencies: DependencyConfig,

  #[serde(default)]
  pub stage: StageConfig,

  #[serde(default)]
  pub admin: AdminConfig,

  #[serde(default)]
  pub serve: ServeConfig,

  #[serde(default)]
  pub migrations: MigrationConfig,

  #[serde(default)]
  pub image: ImageConfig,

  /// Directory the config was loaded from.
  #[serde(skip)]
  pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependencyConfig {
  /// Lock specification file.
  pub lock: PathBuf,
  /// Package source: an http(s) base URL or a path to a JSON index file.
  pub index: String,
  /// Opaque installer command, run with `$out` and `$requirements` set.
  pub installer: Option<String>,
}

impl Default for DependencyConfig {
  fn default() -> Self {
    Self {
      lock: PathBuf::from(LOCK_FILENAME),
      index: "https://pypi.org/pypi".to_string(),
      installer: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageConfig {
  pub code: PathBuf,
  pub migrations: PathBuf,
  /// Whether migration assets are part of the image. Defaults to true.
  pub include_migrations: Option<bool>,
  /// File or directory names skipped while staging.
  pub exclude: Vec<String>,
}

impl Default for StageConfig {
  fn default() -> Self {
    Self {
      code: PathBuf::from("app"),
      migrations: PathBuf::from("migrations"),
      include_migrations: None,
      exclude: vec![".git".to_string(), "__pycache__".to_string()],
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminConfig {
  /// Command installing the database client tool into the admin image.
  pub client_install: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
  pub port: Option<u16>,
  pub host: String,
  pub event_loop: EventLoop,
  pub program: String,
  pub app: String,
  pub args: Vec<String>,
  pub expose_port: Option<Toggle>,
  pub launch: Option<Toggle>,
}

impl Default for ServeConfig {
  fn default() -> Self {
    Self {
      port: None,
      host: DEFAULT_HOST.to_string(),
      event_loop: EventLoop::Uvloop,
      program: "uvicorn".to_string(),
      app: "app.main:app".to_string(),
      args: Vec::new(),
      expose_port: None,
      launch: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
  pub gate: Option<MigrationGate>,
  /// Default database URL; `DATABASE_URL` takes precedence at runtime.
  pub database_url: Option<String>,
  pub max_attempts: u32,
  #[serde(with = "crate::util::duration")]
  pub initial_backoff: Duration,
  #[serde(with = "crate::util::duration")]
  pub max_backoff: Duration,
}

impl Default for MigrationConfig {
  fn default() -> Self {
    Self {
      gate: None,
      database_url: None,
      max_attempts: 5,
      initial_backoff: Duration::from_millis(250),
      max_backoff: Duration::from_secs(5),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
  pub base: String,
  /// Image or build stage providing the `bootseq` binary.
  pub tool: String,
  pub workdir: String,
}

impl Default for ImageConfig {
  fn default() -> Self {
    Self {
      base: "python:3.12-slim".to_string(),
      tool: "bootseq".to_string(),
      workdir: "/srv/app".to_string(),
    }
  }
}
