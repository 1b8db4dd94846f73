//! Implementation of the `bootseq render` command.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use bootseq_lib::consts::CONFIG_FILENAME;
use bootseq_lib::sequence::{BootstrapError, Stage};
use bootseq_lib::variant::{self, render_dockerfile};

use super::load_config;
use crate::output::print_success;

/// Render the Dockerfile for the configured variant.
///
/// The Docker build context is the config file's directory, so the recipe
/// refers to the config by file name.
pub fn cmd_render(config_path: &Path, output: Option<&Path>) -> Result<()> {
  let config = load_config(config_path)?;
  let plan = variant::select(&config)
    .map_err(|e| BootstrapError::new(Stage::Variant, e))
    .context("Invalid variant configuration")?;

  let config_name = config_path
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or(CONFIG_FILENAME);
  let dockerfile = render_dockerfile(&plan, &config.image, config_name);

  match output {
    Some(path) => {
      fs::write(path, &dockerfile).with_context(|| format!("Failed to write {}", path.display()))?;
      print_success(&format!("Wrote {} Dockerfile to {}", plan.variant, path.display()));
    }
    None => print!("{}", dockerfile),
  }

  Ok(())
}
