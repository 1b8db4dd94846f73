//! Implementation of the `bootseq plan` command.
//!
//! Validates the build configuration and prints the frozen image plan
//! without touching the filesystem.

use std::path::Path;

use anyhow::{Context, Result};

use bootseq_lib::sequence::{BootstrapError, Stage};
use bootseq_lib::variant::{self, ImagePlan};

use super::load_config;
use crate::output::{format_duration, print_json, print_stat, print_success, symbols};

pub fn cmd_plan(config_path: &Path, json: bool) -> Result<()> {
  let config = load_config(config_path)?;
  let plan = variant::select(&config)
    .map_err(|e| BootstrapError::new(Stage::Variant, e))
    .context("Invalid variant configuration")?;

  if json {
    return print_json(&plan);
  }

  print_plan(&plan);
  Ok(())
}

fn print_plan(plan: &ImagePlan) {
  print_success(&format!("{} image", plan.variant));

  let port = match plan.port {
    Some(port) => format!("{} (expose {})", port, plan.expose),
    None => format!("none (expose {})", plan.expose),
  };
  print_stat("Port", &port);

  match &plan.launch {
    Some(spec) => print_stat("Launch", &format!("{} {} {}", plan.launch_mode, symbols::ARROW, spec.command_line())),
    None => print_stat("Launch", &plan.launch_mode.to_string()),
  }

  if let Some(install) = &plan.client_install {
    print_stat("Client install", install);
  }

  print_stat(
    "Migrations",
    &format!(
      "{} (assets {})",
      plan.migrations.gate,
      if plan.stage_migrations { "staged" } else { "excluded" }
    ),
  );
  print_stat(
    "Retry",
    &format!(
      "{} attempts, backoff {} {} {}",
      plan.migrations.retry.max_attempts,
      format_duration(plan.migrations.retry.initial_delay),
      symbols::ARROW,
      format_duration(plan.migrations.retry.max_delay)
    ),
  );
}
