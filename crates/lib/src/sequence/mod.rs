//! Bootstrap sequencer.
//!
//! Composes the stages in strict order:
//!
//! ```text
//! INIT -> DEPS_INSTALLED -> CODE_STAGED -> [MIGRATED] -> [SERVING] -> TERMINAL
//! ```
//!
//! `build` runs up to `CODE_STAGED` and seals the build context. `start`
//! continues from a sealed context: it applies migrations when the image's
//! gate says so, then launches the service when the image auto-launches.
//! Every failure moves the sequence to `TERMINAL(failed)` and nothing after
//! the failing stage runs.

mod types;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{BuildConfig, ConfigError, RuntimeConfig};
use crate::context::{BuildContext, ContextRecord, StagedContext};
use crate::deps::{IndexSource, LockSpecification, Materializer};
use crate::exec::run_shell;
use crate::launch::{LaunchEnv, ProcessLauncher, ServiceLauncher};
use crate::migrate::{Connector, MigrationApplier, MigrationGate, MigrationReport, MigrationSet, SqliteConnector};
use crate::variant::{self, ImagePlan};

pub use types::{BootstrapError, ErrorKind, Outcome, Stage, StageError, State, Transition, TransitionError};

/// What `start` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartReport {
  /// Present when migrations were applied on start.
  pub migrations: Option<MigrationReport>,
  /// Whether the service was launched (and has since exited cleanly).
  pub launched: bool,
}

/// Drives one container lifecycle through the bootstrap states.
///
/// A sequencer is single-use: once it reaches `TERMINAL` it stays there.
pub struct Sequencer<L = ProcessLauncher> {
  launcher: L,
  runtime: RuntimeConfig,
  state: State,
  history: Vec<Transition>,
}

impl Sequencer<ProcessLauncher> {
  pub fn new(runtime: RuntimeConfig) -> Self {
    Self::with_launcher(ProcessLauncher, runtime)
  }
}

impl<L: ServiceLauncher> Sequencer<L> {
  pub fn with_launcher(launcher: L, runtime: RuntimeConfig) -> Self {
    Self {
      launcher,
      runtime,
      state: State::Init,
      history: Vec::new(),
    }
  }

  pub fn state(&self) -> State {
    self.state
  }

  /// Transitions taken so far, oldest first.
  pub fn history(&self) -> &[Transition] {
    &self.history
  }

  pub fn launcher(&self) -> &L {
    &self.launcher
  }

  /// Run the build-time stages and seal the context at `context_dir`.
  ///
  /// The variant is selected before anything touches the filesystem, so a
  /// contradictory configuration fails with nothing executed.
  pub async fn build(&mut self, config: &BuildConfig, context_dir: &Path) -> Result<StagedContext, BootstrapError> {
    let plan = variant::select(config).map_err(|e| self.fail(Stage::Variant, e))?;
    info!(variant = %plan.variant, port = ?plan.exposed_port(), "variant selected");

    let lock_path = config.resolve(&config.dependencies.lock);
    let lock = LockSpecification::load(&lock_path).map_err(|e| self.fail(Stage::Dependencies, e))?;

    let ctx = BuildContext::create(context_dir, "bootseq build").map_err(|e| self.fail(Stage::Staging, e))?;

    let materializer = Materializer::new(IndexSource::from_spec(&config.dependencies.index, &config.root))
      .with_installer(config.dependencies.installer.clone());
    let environment = materializer
      .materialize(&lock, &ctx.env_dir())
      .await
      .map_err(|e| self.fail(Stage::Dependencies, e))?;
    self.advance(State::DepsInstalled)?;

    if let Some(install) = &plan.client_install {
      info!(command = %install, "installing database client");
      let mut vars = BTreeMap::new();
      vars.insert("out".to_string(), ctx.env_dir().to_string_lossy().to_string());
      run_shell(install, &vars, ctx.root(), None)
        .await
        .map_err(|e| self.fail(Stage::AdminTooling, e))?;
    }

    let code = ctx
      .stage_tree(&config.resolve(&config.stage.code), &ctx.app_dir(), &config.stage.exclude)
      .map_err(|e| self.fail(Stage::Staging, e))?;

    let migrations_staged = self.stage_migrations(config, &plan, &ctx)?;

    let record = ContextRecord::new(plan, environment, code.digest, migrations_staged);
    let staged = ctx.seal(record).map_err(|e| self.fail(Stage::Staging, e))?;
    self.advance(State::CodeStaged)?;

    Ok(staged)
  }

  /// Copy migration assets when the plan includes them, validating the set.
  ///
  /// A missing migrations directory is only an error when inclusion was
  /// requested explicitly and the gate needs the assets; otherwise an empty
  /// set is staged.
  fn stage_migrations(
    &mut self,
    config: &BuildConfig,
    plan: &ImagePlan,
    ctx: &BuildContext,
  ) -> Result<bool, BootstrapError> {
    let dest = ctx.migrations_dir();
    if !plan.stage_migrations {
      ctx.clear(&dest).map_err(|e| self.fail(Stage::Staging, e))?;
      info!("migration assets excluded from the image");
      return Ok(false);
    }

    let src = config.resolve(&config.stage.migrations);
    if !src.is_dir() && config.stage.include_migrations.is_none() {
      warn!(dir = %src.display(), "no migrations directory, staging an empty set");
      ctx.clear(&dest).map_err(|e| self.fail(Stage::Staging, e))?;
      std::fs::create_dir_all(&dest).map_err(|source| {
        self.fail(
          Stage::Staging,
          crate::context::ContextError::Io {
            path: dest.clone(),
            source,
          },
        )
      })?;
      return Ok(true);
    }

    ctx
      .stage_tree(&src, &dest, &config.stage.exclude)
      .map_err(|e| self.fail(Stage::Staging, e))?;
    let set = MigrationSet::load(&dest).map_err(|e| self.fail(Stage::Staging, e))?;
    info!(count = set.len(), latest = set.latest_version(), "migration assets staged");
    Ok(true)
  }

  /// Run the runtime stages from a sealed context.
  pub async fn start(&mut self, staged: &StagedContext) -> Result<StartReport, BootstrapError> {
    let plan = staged.plan();
    let connector = if plan.migrations.gate == MigrationGate::OnStart {
      let url = self
        .runtime
        .database_url_or(plan.migrations.database_url.as_deref())
        .ok_or_else(|| {
          ConfigError::Invalid(
            "migrations run on start but no database url is configured (set DATABASE_URL or migrations.database_url)"
              .to_string(),
          )
        })
        .map_err(|e| self.fail(Stage::Migration, e))?;
      Some(SqliteConnector::from_url(&url).map_err(|e| self.fail(Stage::Migration, e))?)
    } else {
      None
    };
    self.start_with(staged, connector).await
  }

  /// Run the runtime stages with an explicit migration connector.
  ///
  /// `connector` is only used when the image gates migrations on start.
  pub async fn start_with<C: Connector>(
    &mut self,
    staged: &StagedContext,
    connector: Option<C>,
  ) -> Result<StartReport, BootstrapError> {
    self.resume_at(State::CodeStaged)?;
    let plan = staged.plan();

    let migrations = match (plan.migrations.gate, connector) {
      (MigrationGate::OnStart, Some(connector)) => {
        let report = self.apply_migrations(staged, connector).await?;
        self.advance(State::Migrated)?;
        Some(report)
      }
      (MigrationGate::OnStart, None) => {
        return Err(self.fail(
          Stage::Migration,
          ConfigError::Invalid("migrations run on start but no database is configured".to_string()),
        ));
      }
      (MigrationGate::Manual, _) => {
        info!("migrations are applied manually with `bootseq migrate`");
        None
      }
    };

    let Some(spec) = plan.auto_launch() else {
      info!(variant = %plan.variant, "image does not launch the service automatically");
      self.advance(State::Terminal(Outcome::Success))?;
      return Ok(StartReport {
        migrations,
        launched: false,
      });
    };

    let mut spec = spec.clone();
    if let Some(host) = &self.runtime.host {
      spec = spec.with_host(host.clone());
    }

    let bin = staged.env_dir().join("bin");
    let env = LaunchEnv {
      workdir: Some(staged.root().to_path_buf()),
      path_prefix: if bin.is_dir() { vec![bin] } else { Vec::new() },
      import_path: vec![staged.env_dir()],
    };

    self.advance(State::Serving)?;
    self
      .launcher
      .launch(&spec, &env)
      .await
      .map_err(|e| self.fail(Stage::Launch, e))?;
    self.advance(State::Terminal(Outcome::Success))?;

    Ok(StartReport {
      migrations,
      launched: true,
    })
  }

  async fn apply_migrations<C: Connector>(
    &mut self,
    staged: &StagedContext,
    connector: C,
  ) -> Result<MigrationReport, BootstrapError> {
    let Some(dir) = staged.migrations_dir() else {
      return Err(self.fail(
        Stage::Migration,
        ConfigError::Invalid("migrations run on start but the image carries no migration assets".to_string()),
      ));
    };
    let set = MigrationSet::load(&dir).map_err(|e| self.fail(Stage::Migration, e))?;

    info!(endpoint = %connector.endpoint(), latest = set.latest_version(), "applying migrations before launch");
    let applier = MigrationApplier::new(connector, staged.plan().migrations.retry.clone());
    applier.apply(&set).await.map_err(|e| self.fail(Stage::Migration, e))
  }

  /// Build and start in one process.
  pub async fn boot(&mut self, config: &BuildConfig, context_dir: &Path) -> Result<StartReport, BootstrapError> {
    let staged = self.build(config, context_dir).await?;
    self.start(&staged).await
  }

  /// A fresh sequencer picks up a sealed context at `CODE_STAGED`.
  fn resume_at(&mut self, state: State) -> Result<(), BootstrapError> {
    match self.state {
      current if current == state => Ok(()),
      State::Init => {
        info!(state = %state, "resuming from sealed context");
        self.state = state;
        Ok(())
      }
      current => Err(BootstrapError::new(
        Stage::Sequence,
        TransitionError {
          from: current,
          to: state,
        },
      )),
    }
  }

  fn advance(&mut self, next: State) -> Result<(), BootstrapError> {
    let from = self.state;
    if !from.can_advance_to(next) {
      return Err(BootstrapError::new(Stage::Sequence, TransitionError { from, to: next }));
    }
    info!(from = %from, to = %next, "state transition");
    self.history.push(Transition { from, to: next });
    self.state = next;
    Ok(())
  }

  /// Move to `TERMINAL(failed)` and wrap the error.
  fn fail(&mut self, stage: Stage, error: impl Into<StageError>) -> BootstrapError {
    let err = BootstrapError::new(stage, error);
    warn!(stage = %stage, kind = err.kind.class(), error = %err.source, "bootstrap failed");
    if self.state.can_advance_to(State::Terminal(Outcome::Failed)) {
      self.history.push(Transition {
        from: self.state,
        to: State::Terminal(Outcome::Failed),
      });
      self.state = State::Terminal(Outcome::Failed);
    }
    err
  }
}
