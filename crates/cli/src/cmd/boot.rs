//! Implementation of the `bootseq boot` command: build then start.

use std::path::Path;

use anyhow::{Context, Result};

use bootseq_lib::config::RuntimeConfig;
use bootseq_lib::sequence::Sequencer;

use super::{load_config, print_start_report, runtime};

pub fn cmd_boot(config_path: &Path, context: &Path) -> Result<()> {
  let config = load_config(config_path)?;

  let rt = runtime()?;
  let mut sequencer = Sequencer::new(RuntimeConfig::from_env());
  let report = rt
    .block_on(sequencer.boot(&config, context))
    .context("Boot failed")?;

  print_start_report(&report);
  Ok(())
}
