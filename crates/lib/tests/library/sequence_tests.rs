//! End-to-end bootstrap sequences through the public API.

use bootseq_lib::config::RuntimeConfig;
use bootseq_lib::context::StagedContext;
use bootseq_lib::migrate::{MigrationApplier, MigrationSet, SqliteConnector};
use bootseq_lib::sequence::{BootstrapError, ErrorKind, Outcome, Sequencer, Stage, State};
use bootseq_lib::variant::render_dockerfile;

use super::common::{ADMIN_CONFIG, Fixture, RecordingLauncher, SERVING_CONFIG};

#[tokio::test]
async fn serving_image_listens_on_all_interfaces() {
  let fixture = Fixture::new(SERVING_CONFIG);
  let launcher = RecordingLauncher::default();
  let mut seq = Sequencer::with_launcher(launcher.clone(), fixture.runtime());
  let config = fixture.config();

  let staged = seq.build(&config, &fixture.context_dir("ctx")).await.unwrap();
  let dockerfile = render_dockerfile(staged.plan(), &config.image, "bootseq.toml");
  let report = seq.start(&staged).await.unwrap();

  assert!(dockerfile.contains("\nEXPOSE 4000\n"));
  assert!(report.launched);
  assert_eq!(seq.state(), State::Terminal(Outcome::Success));
  let launched = launcher.launched.lock().unwrap();
  assert_eq!(launched.len(), 1);
  assert_eq!(launched[0].binding.address(), "0.0.0.0:4000");
}

#[tokio::test]
async fn builds_are_deterministic() {
  let fixture = Fixture::new(SERVING_CONFIG);
  let config = fixture.config();

  let first = Sequencer::with_launcher(RecordingLauncher::default(), RuntimeConfig::default())
    .build(&config, &fixture.context_dir("a"))
    .await
    .unwrap();
  let second = Sequencer::with_launcher(RecordingLauncher::default(), RuntimeConfig::default())
    .build(&config, &fixture.context_dir("b"))
    .await
    .unwrap();

  let pins: Vec<_> = first.record().environment.packages.iter().map(|p| p.pin()).collect();
  assert_eq!(pins, vec!["fastapi==1.10.1", "uvicorn==0.29.0"]);
  assert_eq!(first.record().environment, second.record().environment);
  assert_eq!(first.record().code_digest, second.record().code_digest);
}

#[tokio::test]
async fn admin_manual_migration_against_unreachable_database() {
  let fixture = Fixture::new(ADMIN_CONFIG);
  fixture.write("migrations/0001_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY);");
  let launcher = RecordingLauncher::default();
  let mut seq = Sequencer::with_launcher(launcher.clone(), RuntimeConfig::default());

  let staged = seq.build(&fixture.config(), &fixture.context_dir("ctx")).await.unwrap();
  let report = seq.start(&staged).await.unwrap();
  assert!(!report.launched);
  drop(staged);

  // The operator runs the migration by hand against a database that never answers.
  let staged = StagedContext::open(&fixture.context_dir("ctx"), "migrate").unwrap();
  let set = MigrationSet::load(&staged.migrations_dir().unwrap()).unwrap();
  let url = format!("sqlite://{}", fixture.path().join("no/such/dir/app.db").display());
  let applier = MigrationApplier::new(
    SqliteConnector::from_url(&url).unwrap(),
    staged.plan().migrations.retry.clone(),
  );
  let err = BootstrapError::new(Stage::Migration, applier.apply(&set).await.unwrap_err());

  assert_eq!(err.kind, ErrorKind::DatabaseUnreachable);
  assert_eq!(err.kind.class(), "NetworkError");
  assert_ne!(err.exit_code(), 0);
  assert!(launcher.launched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn serving_without_exposed_port_is_rejected() {
  let fixture = Fixture::new(&SERVING_CONFIG.replace("port = 4000", "port = 4000\nexpose_port = \"absent\""));
  let mut seq = Sequencer::with_launcher(RecordingLauncher::default(), RuntimeConfig::default());

  let err = seq.build(&fixture.config(), &fixture.context_dir("ctx")).await.unwrap_err();

  assert_eq!(err.kind, ErrorKind::ConfigConflict);
  assert!(!fixture.context_dir("ctx").exists());
}

#[tokio::test]
async fn failure_exit_codes_are_distinct() {
  let resolution = {
    let fixture = Fixture::new(SERVING_CONFIG);
    fixture.write("bootseq.lock", r#"{"version":1,"packages":[{"name":"fastapi","version":"^9"}]}"#);
    Sequencer::with_launcher(RecordingLauncher::default(), fixture.runtime())
      .boot(&fixture.config(), &fixture.context_dir("ctx"))
      .await
      .unwrap_err()
  };
  let migration = {
    let fixture = Fixture::new(SERVING_CONFIG);
    fixture.write("migrations/0001_bad.sql", "THIS IS NOT SQL;");
    Sequencer::with_launcher(RecordingLauncher::default(), fixture.runtime())
      .boot(&fixture.config(), &fixture.context_dir("ctx"))
      .await
      .unwrap_err()
  };

  assert_eq!(resolution.stage, Stage::Dependencies);
  assert_eq!(migration.stage, Stage::Migration);
  assert_ne!(resolution.exit_code(), migration.exit_code());
}
