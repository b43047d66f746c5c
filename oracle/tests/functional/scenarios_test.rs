//! The scenario matrix against a real deployment of the pipeline.
//!
//! The collaborators are described by `configuration/` at the workspace root; see the `local` and
//! `ci` files. Run with `cargo test -p oracle --features functional -- --ignored`.

use std::path::PathBuf;

use config::load_config_from;
use config::shared::HarnessConfig;
use oracle::EncodingFormat;
use oracle::bus::MessageBus;
use oracle::environment::{EnvironmentState, TestEnvironment};
use telemetry::tracing::init_test_tracing;

fn load_harness_config() -> HarnessConfig {
    let directory = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("configuration");

    load_config_from::<HarnessConfig>(&directory).expect("failed to load the harness configuration")
}

async fn run_matrix(format: EncodingFormat) {
    init_test_tracing();
    let mut environment = TestEnvironment::new(load_harness_config());
    environment.configure(format).unwrap();
    environment.start().await.unwrap();
    assert_eq!(environment.state(), EnvironmentState::Running);

    let mut runner = environment.scenario_runner().unwrap();
    let report = runner.run_all().await;
    runner.into_collector().into_bus().close().await.unwrap();

    environment.stop().await;
    assert!(report.is_success(), "{report}");
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn json_matrix_passes() {
    run_matrix(EncodingFormat::Json).await;
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn avro_matrix_passes() {
    run_matrix(EncodingFormat::Avro).await;
}
