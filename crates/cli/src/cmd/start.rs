//! Implementation of the `bootseq start` command.
//!
//! Continues from a sealed build context: applies migrations when the image
//! gates them on start, then launches the service when the image auto-launches.

use std::path::Path;

use anyhow::{Context, Result};

use bootseq_lib::config::RuntimeConfig;
use bootseq_lib::context::StagedContext;
use bootseq_lib::sequence::{BootstrapError, Sequencer, Stage};

use super::{print_start_report, runtime};

pub fn cmd_start(context: &Path) -> Result<()> {
  let staged = StagedContext::open(context, "bootseq start")
    .map_err(|e| BootstrapError::new(Stage::Staging, e))
    .with_context(|| format!("Failed to open build context: {}", context.display()))?;

  let rt = runtime()?;
  let mut sequencer = Sequencer::new(RuntimeConfig::from_env());
  let report = rt.block_on(sequencer.start(&staged)).context("Start failed")?;

  print_start_report(&report);
  Ok(())
}
