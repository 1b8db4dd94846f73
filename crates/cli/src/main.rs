mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bootseq_lib::consts::{CONFIG_FILENAME, DEFAULT_CONTEXT_DIR};
use bootseq_lib::sequence::BootstrapError;

use crate::cmd::MigrationTarget;
use crate::output::print_error;

/// bootseq - container bootstrap sequencer
#[derive(Parser)]
#[command(name = "bootseq")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Path to the build configuration
  #[arg(long, global = true, default_value = CONFIG_FILENAME)]
  config: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate the configuration and print the image plan
  Plan {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Render the Dockerfile for the configured variant
  Render {
    /// Write to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },

  /// Materialize dependencies and stage code into a build context
  Build {
    /// Build context directory
    #[arg(long, default_value = DEFAULT_CONTEXT_DIR)]
    context: PathBuf,
  },

  /// Run the runtime stages from a sealed build context
  Start {
    /// Build context directory
    #[arg(long, default_value = DEFAULT_CONTEXT_DIR)]
    context: PathBuf,
  },

  /// Build and start in one process
  Boot {
    /// Build context directory
    #[arg(long, default_value = DEFAULT_CONTEXT_DIR)]
    context: PathBuf,
  },

  /// Apply pending migrations
  Migrate {
    #[command(flatten)]
    target: MigrationTarget,
  },

  /// Show the applied migration version and pending migrations
  Status {
    #[command(flatten)]
    target: MigrationTarget,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Plan { json } => cmd::cmd_plan(&cli.config, json),
    Commands::Render { output } => cmd::cmd_render(&cli.config, output.as_deref()),
    Commands::Build { context } => cmd::cmd_build(&cli.config, &context),
    Commands::Start { context } => cmd::cmd_start(&context),
    Commands::Boot { context } => cmd::cmd_boot(&cli.config, &context),
    Commands::Migrate { target } => cmd::cmd_migrate(&cli.config, &target),
    Commands::Status { target, json } => cmd::cmd_status(&cli.config, &target, json),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::from(exit_code(&err))
    }
  }
}

/// `RUST_LOG` wins; otherwise `-v` picks the level.
fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

/// Exit code of the first bootstrap failure in the chain, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
  err
    .chain()
    .find_map(|cause| cause.downcast_ref::<BootstrapError>())
    .map(BootstrapError::exit_code)
    .unwrap_or(1)
}
