//! Shell command execution for installer and tooling steps.
//!
//! Commands run with a controlled environment:
//! - Clears all environment variables except a small pass-through set
//!   (`PATH`, `HOME`, proxy settings)
//! - Sets a minimal locale
//! - Sets `SOURCE_DATE_EPOCH` so installers produce reproducible timestamps
//! - Merges caller-specified variables last

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Variables copied from the parent environment.
const PASS_THROUGH: &[&str] = &[
  "PATH",
  "HOME",
  "http_proxy",
  "https_proxy",
  "no_proxy",
  "HTTP_PROXY",
  "HTTPS_PROXY",
  "NO_PROXY",
];

/// January 1, 1980 00:00:00 UTC (ZIP epoch).
const SOURCE_DATE_EPOCH: &str = "315532800";

/// Errors from running a command.
#[derive(Debug, Error)]
pub enum ExecError {
  #[error("command failed with exit code {code:?}: {cmd}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("failed to run command: {0}")]
  Io(#[from] std::io::Error),
}

/// Run `cmd` through the shell and return its trimmed stdout.
///
/// # Arguments
///
/// * `cmd` - The command string to execute
/// * `env` - Extra environment variables
/// * `cwd` - Working directory
/// * `shell` - Shell override (defaults to /bin/sh on Unix, powershell.exe on Windows)
pub async fn run_shell(
  cmd: &str,
  env: &BTreeMap<String, String>,
  cwd: &Path,
  shell: Option<&str>,
) -> Result<String, ExecError> {
  info!(cmd = %cmd, "executing command");

  let (shell_cmd, shell_args) = get_shell(shell);

  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(cmd)
    .current_dir(cwd)
    .env_clear()
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH);

  for key in PASS_THROUGH {
    if let Ok(value) = std::env::var(key) {
      command.env(key, value);
    }
  }

  for (key, value) in env {
    command.env(key, value);
  }

  debug!(shell = %shell_cmd, cwd = %cwd.display(), "spawning process");

  let output = command.output().await?;
  let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

  if !output.status.success() {
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }
    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }

    return Err(ExecError::Failed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      stderr,
    });
  }

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }

  Ok(stdout)
}

/// Get the shell command and arguments for the current platform.
///
/// `/bin/sh` rather than `$SHELL`, since interactive shells may source
/// profile files that change the environment.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
