//! Test utilities for bootseq-lib.
//!
//! Cross-platform helpers for tests that execute shell commands.

/// Returns a shell snippet that prints an environment variable.
#[cfg(unix)]
pub fn echo_env(var: &str) -> String {
  format!("echo \"${}\"", var)
}

#[cfg(windows)]
pub fn echo_env(var: &str) -> String {
  format!("Write-Output $env:{}", var)
}

/// Returns a shell snippet that writes `content` to `file` in the working directory.
#[cfg(unix)]
pub fn write_file(file: &str, content: &str) -> String {
  format!("printf '%s' '{}' > \"{}\"", content, file)
}

#[cfg(windows)]
pub fn write_file(file: &str, content: &str) -> String {
  format!("Set-Content -NoNewline -Path '{}' -Value '{}'", file, content)
}
