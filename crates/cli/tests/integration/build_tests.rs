//! Build command integration tests.

use predicates::prelude::*;

use super::common::{ADMIN_CONFIG, SERVING_CONFIG, TestEnv};

#[test]
fn build_seals_context() {
  let env = TestEnv::project(SERVING_CONFIG);

  env
    .bootseq_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Build context sealed"))
    .stdout(predicate::str::contains("Variant: serving"))
    .stdout(predicate::str::contains("Packages: 2"));

  let context = env.context_path();
  assert!(context.join("context.json").exists());
  assert!(context.join("app/main.py").exists());
  let requirements = std::fs::read_to_string(context.join("env/requirements.txt")).unwrap();
  assert_eq!(requirements, "fastapi==1.10.1\nuvicorn==0.29.0\n");
}

#[test]
fn build_into_custom_context() {
  let env = TestEnv::project(SERVING_CONFIG);

  env.bootseq_cmd().args(["build", "--context", "out"]).assert().success();

  assert!(env.path().join("out/context.json").exists());
  assert!(!env.context_path().exists());
}

#[test]
fn admin_build_runs_client_install() {
  let env = TestEnv::project(ADMIN_CONFIG);

  env
    .bootseq_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Variant: admin"));
}

#[test]
fn unsatisfiable_lock_exits_with_resolution_code() {
  let env = TestEnv::project(SERVING_CONFIG);
  env.write_file(
    "bootseq.lock",
    r#"{"version":1,"packages":[{"name":"fastapi","version":">=9"}]}"#,
  );

  env
    .bootseq_cmd()
    .arg("build")
    .assert()
    .code(10)
    .stderr(predicate::str::contains("ResolutionError"));

  assert!(!env.context_path().join("context.json").exists());
}

#[test]
fn missing_code_exits_with_staging_code() {
  let env = TestEnv::project(SERVING_CONFIG);
  std::fs::remove_dir_all(env.path().join("app")).unwrap();

  env.bootseq_cmd().arg("build").assert().code(13);
}

#[test]
fn conflicting_config_exits_before_building() {
  let env = TestEnv::project(&SERVING_CONFIG.replace("port = 4000", "port = 4000\nexpose_port = \"disabled\""));

  env
    .bootseq_cmd()
    .arg("build")
    .assert()
    .code(3)
    .stderr(predicate::str::contains("ConfigConflictError"));

  assert!(!env.context_path().exists());
}

#[test]
fn malformed_migration_name_exits_with_staging_code() {
  let env = TestEnv::project(SERVING_CONFIG);
  env.write_file("migrations/users.sql", "SELECT 1;");

  env
    .bootseq_cmd()
    .arg("build")
    .assert()
    .code(13)
    .stderr(predicate::str::contains("code staging failed"));
}
