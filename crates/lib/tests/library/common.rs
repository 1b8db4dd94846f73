//! Shared fixtures for library integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bootseq_lib::config::{BuildConfig, RuntimeConfig};
use bootseq_lib::launch::{LaunchEnv, LaunchError, LaunchSpec, ServiceLauncher};
use tempfile::TempDir;

/// A project directory with config, lock, index, code and migrations.
pub struct Fixture {
  pub dir: TempDir,
}

impl Fixture {
  pub fn new(config: &str) -> Self {
    let dir = TempDir::new().unwrap();
    let fixture = Self { dir };
    fixture.write("bootseq.toml", config);
    fixture.write(
      "bootseq.lock",
      r#"{"version":1,"packages":[{"name":"fastapi","version":"^1.0"},{"name":"uvicorn","version":"==0.29.0"}]}"#,
    );
    fixture.write(
      "index.json",
      r#"{"packages":{"fastapi":["1.2.0","0.9.0","1.10.1","2.0.0"],"uvicorn":["0.29.0","0.30.1"]}}"#,
    );
    fixture.write("app/main.py", "app = object()\n");
    fixture
  }

  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  pub fn write(&self, rel: &str, content: &str) {
    let path = self.dir.path().join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  pub fn config(&self) -> BuildConfig {
    BuildConfig::load(&self.dir.path().join("bootseq.toml")).unwrap()
  }

  pub fn context_dir(&self, name: &str) -> PathBuf {
    self.dir.path().join(name)
  }

  pub fn database_url(&self) -> String {
    format!("sqlite://{}", self.dir.path().join("app.db").display())
  }

  pub fn runtime(&self) -> RuntimeConfig {
    RuntimeConfig {
      database_url: Some(self.database_url()),
      host: None,
    }
  }
}

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
max_attempts = 3
initial_backoff = "1ms"
max_backoff = "2ms"
"#;

/// Launcher that records what it was asked to start.
#[derive(Clone, Default)]
pub struct RecordingLauncher {
  pub launched: Arc<Mutex<Vec<LaunchSpec>>>,
}

impl ServiceLauncher for RecordingLauncher {
  async fn launch(&self, spec: &LaunchSpec, _env: &LaunchEnv) -> Result<(), LaunchError> {
    self.launched.lock().unwrap().push(spec.clone());
    Ok(())
  }
}
