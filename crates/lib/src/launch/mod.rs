//! Service launcher.
//!
//! Binds the service to `(host, port)` with a chosen event loop and hands
//! control to the service process. There are no retries here: a port that is
//! already bound is fatal, and restarting is the supervisor's job.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Event loop implementation the service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLoop {
  /// Let the server pick; no flag is passed.
  Auto,
  Asyncio,
  #[default]
  Uvloop,
}

impl EventLoop {
  pub fn as_str(&self) -> &'static str {
    match self {
      EventLoop::Auto => "auto",
      EventLoop::Asyncio => "asyncio",
      EventLoop::Uvloop => "uvloop",
    }
  }
}

impl fmt::Display for EventLoop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Where the service listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
  pub host: String,
  pub port: u16,
  pub event_loop: EventLoop,
}

impl ServiceBinding {
  /// `host:port`, bracketing IPv6 literals.
  pub fn address(&self) -> String {
    if self.host.contains(':') {
      format!("[{}]:{}", self.host, self.port)
    } else {
      format!("{}:{}", self.host, self.port)
    }
  }
}

/// Everything needed to start the service process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
  pub program: String,
  pub app: String,
  pub binding: ServiceBinding,
  #[serde(default)]
  pub args: Vec<String>,
}

impl LaunchSpec {
  /// Arguments passed to `program`.
  pub fn argv(&self) -> Vec<String> {
    let mut argv = vec![
      self.app.clone(),
      "--host".to_string(),
      self.binding.host.clone(),
      "--port".to_string(),
      self.binding.port.to_string(),
    ];
    if self.binding.event_loop != EventLoop::Auto {
      argv.push("--loop".to_string());
      argv.push(self.binding.event_loop.as_str().to_string());
    }
    argv.extend(self.args.iter().cloned());
    argv
  }

  /// The full command line, for display.
  pub fn command_line(&self) -> String {
    std::iter::once(self.program.clone())
      .chain(self.argv())
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// Replace the listener host.
  pub fn with_host(mut self, host: impl Into<String>) -> Self {
    self.binding.host = host.into();
    self
  }
}

/// Errors raised while starting or running the service.
#[derive(Debug, Error)]
pub enum LaunchError {
  #[error("cannot bind {address}: {source}")]
  Bind {
    address: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("service exited with {}", describe_exit(.code))]
  Exited { code: Option<i32> },

  #[error("failed waiting for service: {0}")]
  Wait(#[source] io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("exit code {}", code),
    None => "a signal".to_string(),
  }
}

/// Process surroundings for the service: working directory and the
/// materialized environment's executable and import paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchEnv {
  pub workdir: Option<PathBuf>,
  /// Prepended to `PATH`.
  pub path_prefix: Vec<PathBuf>,
  /// Prepended to `PYTHONPATH`.
  pub import_path: Vec<PathBuf>,
}

impl LaunchEnv {
  /// Environment entries to set on the child: each variable with its
  /// prefix entries ahead of the inherited value.
  fn exports(&self) -> Vec<(&'static str, OsString)> {
    [("PATH", &self.path_prefix), ("PYTHONPATH", &self.import_path)]
      .into_iter()
      .filter_map(|(var, prefix)| prepend(var, prefix).map(|value| (var, value)))
      .collect()
  }
}

fn prepend(var: &str, prefix: &[PathBuf]) -> Option<OsString> {
  if prefix.is_empty() {
    return None;
  }
  let inherited = std::env::var_os(var).unwrap_or_default();
  let entries = prefix.iter().cloned().chain(std::env::split_paths(&inherited));
  std::env::join_paths(entries).ok()
}

/// Starts the service process. The seam the sequencer launches through.
pub trait ServiceLauncher {
  /// Run the service until it exits.
  fn launch(&self, spec: &LaunchSpec, env: &LaunchEnv) -> impl Future<Output = Result<(), LaunchError>> + Send;
}

/// Launches the service as a child process with inherited stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ServiceLauncher for ProcessLauncher {
  async fn launch(&self, spec: &LaunchSpec, env: &LaunchEnv) -> Result<(), LaunchError> {
    check_bind(&spec.binding)?;

    info!(command = %spec.command_line(), address = %spec.binding.address(), "launching service");

    let mut command = Command::new(&spec.program);
    command.args(spec.argv()).kill_on_drop(true);
    if let Some(workdir) = &env.workdir {
      command.current_dir(workdir);
    }
    for (var, value) in env.exports() {
      command.env(var, value);
    }

    let mut child = command
      .spawn()
      .map_err(|source| LaunchError::Spawn {
        program: spec.program.clone(),
        source,
      })?;

    let status = tokio::select! {
      status = child.wait() => status.map_err(LaunchError::Wait)?,
      _ = tokio::signal::ctrl_c() => {
        warn!("interrupt received, stopping service");
        child.start_kill().map_err(LaunchError::Wait)?;
        child.wait().await.map_err(LaunchError::Wait)?
      }
      stop = terminate_requested() => {
        stop.map_err(LaunchError::Wait)?;
        warn!("termination requested, forwarding to service");
        forward_terminate(&mut child).map_err(LaunchError::Wait)?;
        child.wait().await.map_err(LaunchError::Wait)?
      }
    };

    finish(status)
  }
}

/// Resolves once the process is asked to stop with SIGTERM.
#[cfg(unix)]
async fn terminate_requested() -> io::Result<()> {
  use tokio::signal::unix::{SignalKind, signal};

  let mut terminate = signal(SignalKind::terminate())?;
  terminate.recv().await;
  Ok(())
}

#[cfg(not(unix))]
async fn terminate_requested() -> io::Result<()> {
  std::future::pending().await
}

/// Pass SIGTERM on so the service can shut down gracefully.
#[cfg(unix)]
fn forward_terminate(child: &mut Child) -> io::Result<()> {
  let Some(pid) = child.id() else {
    return Ok(());
  };
  // SAFETY: `pid` is our own child, which has not been reaped yet.
  if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
    Ok(())
  } else {
    child.start_kill()
  }
}

#[cfg(not(unix))]
fn forward_terminate(child: &mut Child) -> io::Result<()> {
  child.start_kill()
}

fn finish(status: ExitStatus) -> Result<(), LaunchError> {
  debug!(status = %status, "service exited");
  if status.success() {
    Ok(())
  } else {
    Err(LaunchError::Exited { code: status.code() })
  }
}

/// Check that the listener address can be bound.
///
/// The test socket is released before the service starts, so this catches
/// an occupied port at startup rather than guaranteeing it stays free.
pub fn check_bind(binding: &ServiceBinding) -> Result<(), LaunchError> {
  let address = binding.address();
  let listener = TcpListener::bind((binding.host.as_str(), binding.port))
    .map_err(|source| LaunchError::Bind {
      address: address.clone(),
      source,
    })?;
  debug!(address = %address, "listener address is free");
  drop(listener);
  Ok(())
}
