//! Shared test helpers for CLI integration tests.

use std::net::TcpListener;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Serving project with a local index and fast migration retries.
pub const SERVING_CONFIG: &str = r#"
variant = "serving"

[dependencies]
index = "index.json"

[serve]
port = 4000

[migrations]
max_attempts = 2
initial_backoff = "1ms"
max_backoff = "2ms"
"#;

pub const ADMIN_CONFIG: &str = r#"
variant = "admin"

[dependencies]
index = "index.json"

[admin]
client_install = "echo installing client"

[migrations]
max_attempts = 2
initial_backoff = "1ms"
max_backoff = "2ms"
"#;

pub const LOCK: &str =
  r#"{"version":1,"packages":[{"name":"fastapi","version":"^1.0"},{"name":"uvicorn","version":"==0.29.0"}]}"#;

pub const INDEX: &str = r#"{"packages":{"fastapi":["1.2.0","0.9.0","1.10.1","2.0.0"],"uvicorn":["0.29.0","0.30.1"]}}"#;

/// Isolated project directory.
///
/// Commands run with the project as their working directory and without an
/// inherited `DATABASE_URL` or `BOOTSEQ_HOST`.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Create a project with `config`, the default lock, index and app code.
  pub fn project(config: &str) -> Self {
    let env = Self::empty();
    env.write_file("bootseq.toml", config);
    env.write_file("bootseq.lock", LOCK);
    env.write_file("index.json", INDEX);
    env.write_file("app/main.py", "app = object()\n");
    env
  }

  /// Create an empty test environment.
  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Path to the default build context.
  pub fn context_path(&self) -> PathBuf {
    self.temp.path().join(".bootseq").join("context")
  }

  /// SQLite URL for a database inside the project.
  pub fn database_url(&self) -> String {
    format!("sqlite://{}", self.temp.path().join("app.db").display())
  }

  /// SQLite URL whose parent directory does not exist.
  pub fn unreachable_database_url(&self) -> String {
    format!("sqlite://{}", self.temp.path().join("no/such/dir/app.db").display())
  }

  /// Get a pre-configured Command for the bootseq binary.
  pub fn bootseq_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("bootseq");
    cmd.current_dir(self.temp.path());
    cmd.env_remove("DATABASE_URL");
    cmd.env_remove("BOOTSEQ_HOST");
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

/// A port nothing is listening on.
pub fn free_port() -> u16 {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  listener.local_addr().unwrap().port()
}
