//! Build and runtime configuration.
//!
//! Build-time inputs come from `bootseq.toml`; runtime inputs (database URL,
//! listener host override) come from the environment and are read once at start.

mod types;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::{DATABASE_URL_ENV, HOST_ENV};

pub use types::{AdminConfig, BuildConfig, DependencyConfig, ImageConfig, MigrationConfig, ServeConfig, StageConfig};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {}", .0.display())]
  NotFound(PathBuf),

  #[error("failed to read config file {}: {source}", path.display())]
  Read { path: PathBuf, source: io::Error },

  #[error("failed to parse config file {}: {source}", path.display())]
  Parse { path: PathBuf, source: toml::de::Error },

  #[error("invalid configuration: {0}")]
  Invalid(String),
}

impl BuildConfig {
  /// Load and parse a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ConfigError::NotFound(path.to_path_buf())),
      Err(e) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source: e,
        });
      }
    };

    let root = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    let root = dunce::canonicalize(&root).unwrap_or(root);

    let mut config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.root = root;

    debug!(path = %path.display(), variant = ?config.variant, "loaded build config");
    Ok(config)
  }

  /// Parse config content. Relative paths resolve against the current directory.
  pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
    let mut config: BuildConfig = toml::from_str(content)?;
    config.root = PathBuf::from(".");
    Ok(config)
  }

  /// Anchor a configured path at the config file's directory.
  pub fn resolve(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.root.join(path)
    }
  }
}

/// Inputs read from the environment when the container starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
  /// Database URL, consumed only by the migration applier.
  pub database_url: Option<String>,
  /// Listener host override, consumed only by the service launcher.
  pub host: Option<String>,
}

impl RuntimeConfig {
  pub fn from_env() -> Self {
    Self {
      database_url: non_empty_var(DATABASE_URL_ENV),
      host: non_empty_var(HOST_ENV),
    }
  }

  /// Runtime URL if set, otherwise the configured default.
  pub fn database_url_or(&self, fallback: Option<&str>) -> Option<String> {
    self.database_url.clone().or_else(|| fallback.map(str::to_string))
  }
}

fn non_empty_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
