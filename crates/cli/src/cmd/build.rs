//! Implementation of the `bootseq build` command.
//!
//! Runs INIT -> DEPS_INSTALLED -> CODE_STAGED and seals the build context.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use bootseq_lib::config::RuntimeConfig;
use bootseq_lib::context::StagedContext;
use bootseq_lib::sequence::Sequencer;

use super::{load_config, runtime};
use crate::output::{format_duration, print_stat, print_success, truncate_hash};

pub fn cmd_build(config_path: &Path, context: &Path) -> Result<()> {
  let config = load_config(config_path)?;
  let started = Instant::now();

  let rt = runtime()?;
  let mut sequencer = Sequencer::new(RuntimeConfig::from_env());
  let staged = rt
    .block_on(sequencer.build(&config, context))
    .context("Build failed")?;

  print_build_summary(&staged);
  print_stat("Took", &format_duration(started.elapsed()));
  Ok(())
}

fn print_build_summary(staged: &StagedContext) {
  let record = staged.record();
  print_success(&format!("Build context sealed at {}", staged.root().display()));
  print_stat("Variant", record.plan.variant.as_str());
  print_stat("Packages", &record.environment.packages.len().to_string());
  print_stat("Environment", truncate_hash(&record.environment.digest.0));
  print_stat("Code", truncate_hash(&record.code_digest.0));
  print_stat(
    "Migrations",
    if record.migrations_staged { "staged" } else { "excluded" },
  );
}
