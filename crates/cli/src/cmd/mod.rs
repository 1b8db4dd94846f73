mod boot;
mod build;
mod migrate;
mod plan;
mod render;
mod start;

use std::path::Path;

use anyhow::{Context, Result};

use bootseq_lib::config::BuildConfig;
use bootseq_lib::sequence::{BootstrapError, Stage, StartReport};

use crate::output::{format_versions, print_info, print_stat, print_success};

pub use boot::cmd_boot;
pub use build::cmd_build;
pub use migrate::{MigrationTarget, cmd_migrate, cmd_status};
pub use plan::cmd_plan;
pub use render::cmd_render;
pub use start::cmd_start;

/// Load the build configuration, classifying failures as config errors.
fn load_config(path: &Path) -> Result<BuildConfig> {
  BuildConfig::load(path)
    .map_err(|e| BootstrapError::new(Stage::Config, e))
    .with_context(|| format!("Failed to load config: {}", path.display()))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

fn print_start_report(report: &StartReport) {
  match &report.migrations {
    Some(migrations) if migrations.is_noop() => {
      print_info(&format!("Schema up to date at version {}", migrations.current_version));
    }
    Some(migrations) => {
      print_success(&format!(
        "Migrated {} -> {}",
        migrations.previous_version, migrations.current_version
      ));
      print_stat("Applied", &format_versions(&migrations.applied));
    }
    None => {}
  }

  if report.launched {
    print_success("Service exited cleanly");
  } else {
    print_info("Image does not launch a service; ready for manual use");
  }
}
