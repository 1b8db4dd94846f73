//! Package sources.
//!
//! A [`PackageIndex`] answers one question: which versions of a package exist.
//! Two sources are supported:
//! - a JSON index file: `{"packages": {"fastapi": ["0.110.0", "0.111.0"]}}`
//! - an HTTP index serving the PyPI JSON API (`GET {base}/{name}/json`)

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::lock::normalize_name;

/// Errors from querying a package source.
#[derive(Debug, Error)]
pub enum IndexError {
  /// The source itself could not be reached or read.
  #[error("package source {source_name} is unreachable: {message}")]
  Unreachable { source_name: String, message: String },

  /// The source answered but does not know the package.
  #[error("package '{0}' is not available from the package source")]
  UnknownPackage(String),

  /// The source answered with something that is not an index.
  #[error("malformed response from package source {source_name}: {message}")]
  Malformed { source_name: String, message: String },
}

/// A source of available package versions.
pub trait PackageIndex {
  /// Human-readable source location, used in logs and errors.
  fn describe(&self) -> String;

  /// All published versions of `name`, in whatever order the source reports.
  fn versions(&self, name: &str) -> impl Future<Output = Result<Vec<String>, IndexError>> + Send;
}

/// A package source selected from a config string.
#[derive(Debug, Clone)]
pub enum IndexSource {
  File(FileIndex),
  Http(HttpIndex),
}

impl IndexSource {
  /// `http://` and `https://` select the HTTP index; anything else is a path
  /// resolved against `root`.
  pub fn from_spec(spec: &str, root: &Path) -> Self {
    if spec.starts_with("http://") || spec.starts_with("https://") {
      IndexSource::Http(HttpIndex::new(spec))
    } else {
      IndexSource::File(FileIndex::new(root.join(spec)))
    }
  }
}

impl PackageIndex for IndexSource {
  fn describe(&self) -> String {
    match self {
      IndexSource::File(index) => index.describe(),
      IndexSource::Http(index) => index.describe(),
    }
  }

  async fn versions(&self, name: &str) -> Result<Vec<String>, IndexError> {
    match self {
      IndexSource::File(index) => index.versions(name).await,
      IndexSource::Http(index) => index.versions(name).await,
    }
  }
}

/// A JSON index file on disk.
#[derive(Debug, Clone)]
pub struct FileIndex {
  path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct IndexFile {
  packages: BTreeMap<String, Vec<String>>,
}

impl FileIndex {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl PackageIndex for FileIndex {
  fn describe(&self) -> String {
    self.path.display().to_string()
  }

  async fn versions(&self, name: &str) -> Result<Vec<String>, IndexError> {
    let content = tokio::fs::read_to_string(&self.path)
      .await
      .map_err(|e| IndexError::Unreachable {
        source_name: self.describe(),
        message: e.to_string(),
      })?;

    let index: IndexFile = serde_json::from_str(&content).map_err(|e| IndexError::Malformed {
      source_name: self.describe(),
      message: e.to_string(),
    })?;

    let wanted = normalize_name(name);
    index
      .packages
      .into_iter()
      .find(|(key, _)| normalize_name(key) == wanted)
      .map(|(_, versions)| versions)
      .ok_or_else(|| IndexError::UnknownPackage(name.to_string()))
  }
}

/// An HTTP index speaking the PyPI JSON API.
#[derive(Debug, Clone)]
pub struct HttpIndex {
  base: String,
  client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
  releases: BTreeMap<String, serde_json::Value>,
}

impl HttpIndex {
  pub fn new(base: &str) -> Self {
    Self {
      base: base.trim_end_matches('/').to_string(),
      client: reqwest::Client::new(),
    }
  }

  fn project_url(&self, name: &str) -> String {
    format!("{}/{}/json", self.base, normalize_name(name))
  }
}

impl PackageIndex for HttpIndex {
  fn describe(&self) -> String {
    self.base.clone()
  }

  async fn versions(&self, name: &str) -> Result<Vec<String>, IndexError> {
    let url = self.project_url(name);
    debug!(url = %url, "querying package index");

    let response = self.client.get(&url).send().await.map_err(|e| IndexError::Unreachable {
      source_name: self.describe(),
      message: e.to_string(),
    })?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
      return Err(IndexError::UnknownPackage(name.to_string()));
    }
    if !status.is_success() {
      return Err(IndexError::Unreachable {
        source_name: self.describe(),
        message: format!("HTTP {}", status),
      });
    }

    let project: ProjectResponse = response.json().await.map_err(|e| IndexError::Malformed {
      source_name: self.describe(),
      message: e.to_string(),
    })?;

    Ok(project.releases.into_keys().collect())
  }
}
