//! Start and boot command integration tests.

use predicates::prelude::*;

use super::common::{ADMIN_CONFIG, TestEnv};

#[test]
fn start_without_build_fails() {
  let env = TestEnv::empty();

  env
    .bootseq_cmd()
    .arg("start")
    .assert()
    .code(13)
    .stderr(predicate::str::contains("has not been sealed"));
}

#[test]
fn admin_start_does_not_migrate_or_launch() {
  let env = TestEnv::project(ADMIN_CONFIG);
  env.write_file("migrations/0001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");

  env.bootseq_cmd().arg("build").assert().success();
  env
    .bootseq_cmd()
    .arg("start")
    .env("DATABASE_URL", env.database_url())
    .assert()
    .success()
    .stdout(predicate::str::contains("ready for manual use"));

  assert!(!env.path().join("app.db").exists());
}

#[cfg(unix)]
mod serving {
  use std::path::Path;
  use std::process::{Command, Stdio};
  use std::time::{Duration, Instant};

  use super::*;
  use crate::common::{SERVING_CONFIG, free_port};

  /// Service that records the import path it was started with, then exits cleanly.
  const RECORDING_SERVICE: &str = "#!/bin/sh\necho \"$PYTHONPATH\" > pythonpath.txt\n";

  /// Serving project whose installer provides `service` as `uvicorn`.
  fn project(service: &str, port: u16) -> TestEnv {
    let env = TestEnv::project(SERVING_CONFIG);
    env.write_file("uvicorn", service);
    let installer = format!(
      r#"[dependencies]
index = "index.json"
installer = '''mkdir -p "$out/bin" && cp "{}" "$out/bin/uvicorn" && chmod +x "$out/bin/uvicorn"'''
"#,
      env.path().join("uvicorn").display()
    );
    let config = SERVING_CONFIG
      .replace("[dependencies]\nindex = \"index.json\"\n", &installer)
      .replace("port = 4000", &format!("port = {}", port));
    env.write_file("bootseq.toml", &config);
    env
  }

  fn wait_for(path: &Path, timeout: Duration) -> String {
    let started = Instant::now();
    loop {
      if let Ok(content) = std::fs::read_to_string(path)
        && !content.trim().is_empty()
      {
        return content;
      }
      assert!(started.elapsed() < timeout, "timed out waiting for {}", path.display());
      std::thread::sleep(Duration::from_millis(50));
    }
  }

  fn is_alive(pid: &str) -> bool {
    Command::new("kill")
      .args(["-0", pid])
      .stderr(Stdio::null())
      .status()
      .unwrap()
      .success()
  }

  #[test]
  fn boot_migrates_then_launches() {
    let env = project(RECORDING_SERVICE, free_port());
    env.write_file("migrations/0001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");

    env
      .bootseq_cmd()
      .arg("boot")
      .env("DATABASE_URL", env.database_url())
      .assert()
      .success()
      .stdout(predicate::str::contains("Migrated 0 -> 1"))
      .stdout(predicate::str::contains("Service exited cleanly"));

    assert!(env.path().join("app.db").exists());
  }

  #[test]
  fn service_imports_from_materialized_environment() {
    let env = project(RECORDING_SERVICE, free_port());

    env
      .bootseq_cmd()
      .arg("boot")
      .env("DATABASE_URL", env.database_url())
      .env_remove("PYTHONPATH")
      .assert()
      .success();

    let context = std::fs::canonicalize(env.context_path()).unwrap();
    let seen = std::fs::read_to_string(context.join("pythonpath.txt")).unwrap();
    assert_eq!(seen.trim(), context.join("env").display().to_string());
  }

  #[test]
  fn terminate_stops_the_service() {
    let env = project("#!/bin/sh\necho $$ > service.pid\nexec sleep 30\n", free_port());

    let mut bootseq = Command::new(env!("CARGO_BIN_EXE_bootseq"))
      .arg("boot")
      .current_dir(env.path())
      .env("DATABASE_URL", env.database_url())
      .env_remove("RUST_LOG")
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .unwrap();

    let service_pid = wait_for(&env.context_path().join("service.pid"), Duration::from_secs(30))
      .trim()
      .to_string();
    std::thread::sleep(Duration::from_millis(200));

    let sent = Command::new("kill")
      .args(["-TERM", &bootseq.id().to_string()])
      .status()
      .unwrap();
    assert!(sent.success());
    bootseq.wait().unwrap();

    assert!(!is_alive(&service_pid), "service {} survived SIGTERM", service_pid);
  }

  #[test]
  fn failed_migration_never_launches() {
    let env = project(RECORDING_SERVICE, free_port());
    env.write_file("migrations/0001_broken.sql", "CREATE TABLE (;");

    env
      .bootseq_cmd()
      .arg("boot")
      .env("DATABASE_URL", env.database_url())
      .assert()
      .code(20)
      .stdout(predicate::str::contains("Service exited cleanly").not());

    assert!(!env.context_path().join("pythonpath.txt").exists());
  }

  #[test]
  fn unreachable_database_exits_with_network_code() {
    let env = project(RECORDING_SERVICE, free_port());
    env.write_file("migrations/0001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");

    env.bootseq_cmd().arg("build").assert().success();
    env
      .bootseq_cmd()
      .arg("start")
      .env("DATABASE_URL", env.unreachable_database_url())
      .assert()
      .code(21)
      .stderr(predicate::str::contains("NetworkError"));
  }

  #[test]
  fn occupied_port_exits_with_bind_code() {
    let listener = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let env = project(RECORDING_SERVICE, port);

    env
      .bootseq_cmd()
      .arg("boot")
      .env("DATABASE_URL", env.database_url())
      .assert()
      .code(30)
      .stderr(predicate::str::contains("BindError"));
  }
}
