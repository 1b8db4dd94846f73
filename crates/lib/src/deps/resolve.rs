//! Version resolution against a package index.

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::index::{IndexError, PackageIndex};
use super::lock::{LockError, LockSpecification};
use crate::util::hash::{ContentHash, hash_lines};

/// A package pinned to one concrete version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
  pub name: String,
  pub version: String,
}

impl ResolvedPackage {
  /// Requirements-file form: `name==version`.
  pub fn pin(&self) -> String {
    format!("{}=={}", self.name, self.version)
  }
}

/// The fully pinned dependency set.
///
/// The digest covers the pins in lock order, so the same lock resolved
/// against the same index always yields the same digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEnvironment {
  pub packages: Vec<ResolvedPackage>,
  pub digest: ContentHash,
}

impl ResolvedEnvironment {
  pub fn new(packages: Vec<ResolvedPackage>) -> Self {
    let digest = hash_lines(packages.iter().map(ResolvedPackage::pin));
    Self { packages, digest }
  }

  /// Contents of a pinned requirements file.
  pub fn requirements(&self) -> String {
    self.packages.iter().map(|p| format!("{}\n", p.pin())).collect()
  }
}

/// Errors from resolving a lock specification.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Index(#[from] IndexError),

  #[error("no version of '{name}' satisfies '{constraint}' (available: {available})")]
  NoMatch {
    name: String,
    constraint: String,
    available: String,
  },
}

/// Pin every package in `lock` to the highest version `index` offers that
/// satisfies its constraint.
pub async fn resolve<I: PackageIndex>(
  lock: &LockSpecification,
  index: &I,
) -> Result<ResolvedEnvironment, ResolveError> {
  let mut packages = Vec::with_capacity(lock.packages.len());

  for locked in &lock.packages {
    let requirement = locked.requirement()?;
    let available = index.versions(&locked.name).await?;

    let best = available
      .iter()
      .filter_map(|raw| parse_version(raw).map(|parsed| (parsed, raw)))
      .filter(|(parsed, _)| requirement.matches(parsed))
      // Equal versions spelled differently (`1.0`, `1.0.0`) tie-break on the spelling.
      .max_by(|(a, raw_a), (b, raw_b)| a.cmp(b).then_with(|| raw_a.cmp(raw_b)));

    let Some((_, raw)) = best else {
      return Err(ResolveError::NoMatch {
        name: locked.name.clone(),
        constraint: locked.version.clone(),
        available: if available.is_empty() {
          "none".to_string()
        } else {
          available.join(", ")
        },
      });
    };

    debug!(package = %locked.name, constraint = %locked.version, version = %raw, "resolved package");
    packages.push(ResolvedPackage {
      name: locked.name.clone(),
      version: raw.clone(),
    });
  }

  let env = ResolvedEnvironment::new(packages);
  info!(packages = env.packages.len(), digest = %env.digest.short(12), "dependency set resolved");
  Ok(env)
}

/// Parse an index version, padding `1` and `1.2` to three components.
///
/// Versions that still don't parse (`1.0.post1`, `2024.1.1.1`) are skipped.
fn parse_version(raw: &str) -> Option<Version> {
  let raw = raw.trim();
  if let Ok(version) = Version::parse(raw) {
    return Some(version);
  }

  let components = raw.split('.').count();
  let all_numeric = raw.split('.').all(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit()));
  if !all_numeric {
    return None;
  }
  let padded = match components {
    1 => format!("{}.0.0", raw),
    2 => format!("{}.0", raw),
    _ => return None,
  };
  Version::parse(&padded).ok()
}
