//! States, stages and errors for the bootstrap sequence.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::context::ContextError;
use crate::deps::{LockError, MaterializeError};
use crate::exec::ExecError;
use crate::launch::LaunchError;
use crate::migrate::MigrationError;
use crate::variant::VariantError;

/// How a sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
  Success,
  Failed,
}

/// Bootstrap state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
  Init,
  DepsInstalled,
  CodeStaged,
  Migrated,
  Serving,
  Terminal(Outcome),
}

impl State {
  fn rank(self) -> u8 {
    match self {
      State::Init => 0,
      State::DepsInstalled => 1,
      State::CodeStaged => 2,
      State::Migrated => 3,
      State::Serving => 4,
      State::Terminal(_) => 5,
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, State::Terminal(_))
  }

  /// Whether `self -> next` is a legal transition.
  ///
  /// The build states are strictly sequential; `Migrated` and `Serving` may
  /// be skipped; any non-terminal state may fail.
  pub fn can_advance_to(self, next: State) -> bool {
    if self.is_terminal() {
      return false;
    }
    match next {
      State::Terminal(Outcome::Failed) => true,
      State::Init => false,
      State::DepsInstalled | State::CodeStaged => next.rank() == self.rank() + 1,
      State::Migrated | State::Serving | State::Terminal(Outcome::Success) => {
        self.rank() >= State::CodeStaged.rank() && next.rank() > self.rank()
      }
    }
  }
}

impl fmt::Display for State {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      State::Init => f.write_str("INIT"),
      State::DepsInstalled => f.write_str("DEPS_INSTALLED"),
      State::CodeStaged => f.write_str("CODE_STAGED"),
      State::Migrated => f.write_str("MIGRATED"),
      State::Serving => f.write_str("SERVING"),
      State::Terminal(Outcome::Success) => f.write_str("TERMINAL(success)"),
      State::Terminal(Outcome::Failed) => f.write_str("TERMINAL(failed)"),
    }
  }
}

/// A recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
  pub from: State,
  pub to: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal state transition {from} -> {to}")]
pub struct TransitionError {
  pub from: State,
  pub to: State,
}

/// Where in the sequence a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
  Config,
  Variant,
  Dependencies,
  AdminTooling,
  Staging,
  Migration,
  Launch,
  /// The sequencer itself, e.g. a step out of order.
  Sequence,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Stage::Config => "configuration",
      Stage::Variant => "variant selection",
      Stage::Dependencies => "dependency materialization",
      Stage::AdminTooling => "admin tooling",
      Stage::Staging => "code staging",
      Stage::Migration => "migration",
      Stage::Launch => "service launch",
      Stage::Sequence => "bootstrap sequence",
    })
  }
}

/// Failure class. Determines the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
  Config,
  ConfigConflict,
  Resolution,
  PackageSourceUnreachable,
  AdminTooling,
  Staging,
  Migration,
  DatabaseUnreachable,
  Bind,
  ServiceExited,
  Other,
}

impl ErrorKind {
  pub fn exit_code(self) -> u8 {
    match self {
      ErrorKind::Other => 1,
      ErrorKind::Config => 2,
      ErrorKind::ConfigConflict => 3,
      ErrorKind::Resolution => 10,
      ErrorKind::PackageSourceUnreachable => 11,
      ErrorKind::AdminTooling => 12,
      ErrorKind::Staging => 13,
      ErrorKind::Migration => 20,
      ErrorKind::DatabaseUnreachable => 21,
      ErrorKind::Bind => 30,
      ErrorKind::ServiceExited => 31,
    }
  }

  /// Operator-facing error class name.
  pub fn class(self) -> &'static str {
    match self {
      ErrorKind::Config => "ConfigError",
      ErrorKind::ConfigConflict => "ConfigConflictError",
      ErrorKind::Resolution => "ResolutionError",
      ErrorKind::PackageSourceUnreachable | ErrorKind::DatabaseUnreachable => "NetworkError",
      ErrorKind::AdminTooling => "AdminToolingError",
      ErrorKind::Staging => "StagingError",
      ErrorKind::Migration => "MigrationError",
      ErrorKind::Bind => "BindError",
      ErrorKind::ServiceExited => "ServiceError",
      ErrorKind::Other => "Error",
    }
  }
}

/// The underlying module error of a failed stage.
#[derive(Debug, Error)]
pub enum StageError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Variant(#[from] VariantError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Materialize(#[from] MaterializeError),

  #[error(transparent)]
  Exec(#[from] ExecError),

  #[error(transparent)]
  Context(#[from] ContextError),

  #[error(transparent)]
  Migration(#[from] MigrationError),

  #[error(transparent)]
  Launch(#[from] LaunchError),

  #[error(transparent)]
  Transition(#[from] TransitionError),
}

impl StageError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      StageError::Config(_) => ErrorKind::Config,
      StageError::Variant(VariantError::Conflict(_)) => ErrorKind::ConfigConflict,
      StageError::Variant(_) => ErrorKind::Config,
      StageError::Lock(_) => ErrorKind::Resolution,
      StageError::Materialize(e) if e.is_network() => ErrorKind::PackageSourceUnreachable,
      StageError::Materialize(_) => ErrorKind::Resolution,
      StageError::Exec(_) => ErrorKind::AdminTooling,
      StageError::Context(_) => ErrorKind::Staging,
      StageError::Migration(MigrationError::Unreachable { .. }) => ErrorKind::DatabaseUnreachable,
      StageError::Migration(MigrationError::UnsupportedUrl(_)) => ErrorKind::Config,
      StageError::Migration(_) => ErrorKind::Migration,
      StageError::Launch(LaunchError::Bind { .. }) => ErrorKind::Bind,
      StageError::Launch(LaunchError::Exited { .. }) => ErrorKind::ServiceExited,
      StageError::Launch(_) => ErrorKind::Other,
      StageError::Transition(_) => ErrorKind::Other,
    }
  }
}

/// A fatal bootstrap failure: which stage failed, and why.
#[derive(Debug, Error)]
#[error("{stage} failed ({}): {source}", .kind.class())]
pub struct BootstrapError {
  pub stage: Stage,
  pub kind: ErrorKind,
  #[source]
  pub source: StageError,
}

impl BootstrapError {
  pub fn new(stage: Stage, error: impl Into<StageError>) -> Self {
    let source = error.into();
    let kind = match (stage, &source) {
      // Bad migration assets found while staging are a build failure.
      (Stage::Staging, StageError::Migration(_)) => ErrorKind::Staging,
      _ => source.kind(),
    };
    Self { stage, kind, source }
  }

  pub fn exit_code(&self) -> u8 {
    self.kind.exit_code()
  }
}
