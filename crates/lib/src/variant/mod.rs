//! Variant selection.
//!
//! A build produces exactly one image shape. The selector turns the build
//! configuration into a frozen [`ImagePlan`], rejecting contradictory
//! configurations before any stage runs.

mod render;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BuildConfig;
use crate::launch::{LaunchSpec, ServiceBinding};
use crate::migrate::{MigrationGate, MigrationPolicy, RetryPolicy};

pub use render::render_dockerfile;

/// Image shape, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentVariant {
  /// Exposes a port and starts the listener.
  Serving,
  /// Carries a database client; no port, no automatic launch.
  Admin,
}

impl DeploymentVariant {
  pub fn as_str(&self) -> &'static str {
    match self {
      DeploymentVariant::Serving => "serving",
      DeploymentVariant::Admin => "admin",
    }
  }
}

impl fmt::Display for DeploymentVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// State of an optional image instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
  /// Active.
  Enabled,
  /// Present in the recipe but inactive.
  Disabled,
  /// Not present at all.
  Absent,
}

impl Toggle {
  pub fn is_enabled(self) -> bool {
    self == Toggle::Enabled
  }
}

impl fmt::Display for Toggle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Toggle::Enabled => "enabled",
      Toggle::Disabled => "disabled",
      Toggle::Absent => "absent",
    })
  }
}

/// Errors raised while selecting a variant.
#[derive(Debug, Error)]
pub enum VariantError {
  /// The configuration asks for mutually exclusive things.
  #[error("configuration conflict: {0}")]
  Conflict(String),

  #[error("the serving variant requires serve.port")]
  MissingPort,

  #[error("the admin variant requires admin.client_install")]
  MissingClientInstall,
}

/// The frozen shape of one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePlan {
  pub variant: DeploymentVariant,
  pub port: Option<u16>,
  pub expose: Toggle,
  pub launch_mode: Toggle,
  /// Present whenever a port is configured, even if launching is disabled.
  pub launch: Option<LaunchSpec>,
  /// Database client install command (admin only).
  pub client_install: Option<String>,
  pub stage_migrations: bool,
  pub migrations: MigrationPolicy,
}

impl ImagePlan {
  /// Port declared by the image, if any.
  pub fn exposed_port(&self) -> Option<u16> {
    if self.expose.is_enabled() { self.port } else { None }
  }

  /// Launch specification when the image starts the service automatically.
  pub fn auto_launch(&self) -> Option<&LaunchSpec> {
    if self.launch_mode.is_enabled() {
      self.launch.as_ref()
    } else {
      None
    }
  }
}

/// Select the image shape for `config`.
pub fn select(config: &BuildConfig) -> Result<ImagePlan, VariantError> {
  let variant = config.variant;
  let serve = &config.serve;

  let expose = serve.expose_port.unwrap_or(match variant {
    DeploymentVariant::Serving => Toggle::Enabled,
    DeploymentVariant::Admin if serve.port.is_some() => Toggle::Disabled,
    DeploymentVariant::Admin => Toggle::Absent,
  });
  let launch_mode = serve.launch.unwrap_or(match variant {
    DeploymentVariant::Serving => Toggle::Enabled,
    DeploymentVariant::Admin => Toggle::Disabled,
  });

  if expose.is_enabled() && !launch_mode.is_enabled() {
    return Err(VariantError::Conflict(format!(
      "port exposure is enabled but the launch command is {}",
      launch_mode
    )));
  }

  match variant {
    DeploymentVariant::Serving => {
      if !expose.is_enabled() {
        return Err(VariantError::Conflict(format!(
          "the serving variant must expose its port (expose_port is {})",
          expose
        )));
      }
      if !launch_mode.is_enabled() {
        return Err(VariantError::Conflict(format!(
          "the serving variant must launch the service (launch is {})",
          launch_mode
        )));
      }
    }
    DeploymentVariant::Admin => {
      if expose.is_enabled() || launch_mode.is_enabled() {
        return Err(VariantError::Conflict(
          "the admin variant cannot expose a port or launch the service".to_string(),
        ));
      }
    }
  }

  let stage_migrations = config.stage.include_migrations.unwrap_or(true);
  let gate = config.migrations.gate.unwrap_or(match variant {
    DeploymentVariant::Serving => MigrationGate::OnStart,
    DeploymentVariant::Admin => MigrationGate::Manual,
  });
  if gate == MigrationGate::OnStart && !stage_migrations {
    return Err(VariantError::Conflict(
      "migrations are gated on start but migration assets are excluded from the image".to_string(),
    ));
  }

  if variant == DeploymentVariant::Serving && serve.port.is_none() {
    return Err(VariantError::MissingPort);
  }

  let client_install = match variant {
    DeploymentVariant::Admin => Some(
      config
        .admin
        .client_install
        .clone()
        .ok_or(VariantError::MissingClientInstall)?,
    ),
    DeploymentVariant::Serving => {
      if config.admin.client_install.is_some() {
        warn!("admin.client_install is ignored for the serving variant");
      }
      None
    }
  };

  let launch = serve.port.map(|port| LaunchSpec {
    program: serve.program.clone(),
    app: serve.app.clone(),
    binding: ServiceBinding {
      host: serve.host.clone(),
      port,
      event_loop: serve.event_loop,
    },
    args: serve.args.clone(),
  });

  let plan = ImagePlan {
    variant,
    port: serve.port,
    expose,
    launch_mode,
    launch,
    client_install,
    stage_migrations,
    migrations: MigrationPolicy {
      gate,
      retry: RetryPolicy {
        max_attempts: config.migrations.max_attempts,
        initial_delay: config.migrations.initial_backoff,
        max_delay: config.migrations.max_backoff,
      },
      database_url: config.migrations.database_url.clone(),
    },
  };

  debug!(
    variant = %plan.variant,
    expose = %plan.expose,
    launch = %plan.launch_mode,
    gate = %gate,
    "selected image plan"
  );
  Ok(plan)
}
