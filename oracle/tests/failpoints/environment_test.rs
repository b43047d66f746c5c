use config::shared::{
    BusConfig, CollectorConfig, HarnessConfig, PgConnectionConfig, PipelineConfig,
    SchemaRegistryConfig, ServiceConfig,
};
use oracle::EncodingFormat;
use oracle::environment::{EnvironmentState, TestEnvironment};
use oracle::error::ErrorKind;
use oracle::failpoints::{START_BUS, START_DATABASE};
use oracle::test_utils::ManualClock;
use oracle::test_utils::failpoints::FailpointGuard;
use telemetry::tracing::init_test_tracing;

fn config() -> HarnessConfig {
    HarnessConfig {
        format: EncodingFormat::Avro,
        startup_timeout_ms: 100,
        startup_poll_interval_ms: 10,
        database: PgConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            name: "postgres".to_string(),
            username: "postgres".to_string(),
            password: None,
            ephemeral: true,
            service: ServiceConfig::default(),
        },
        bus: BusConfig {
            brokers: "127.0.0.1:1".to_string(),
            rest_proxy_url: "http://127.0.0.1:1".to_string(),
            consumer_group: "cdc-oracle".to_string(),
            service: ServiceConfig::default(),
        },
        schema_registry: Some(SchemaRegistryConfig {
            url: "http://127.0.0.1:1".to_string(),
            service: ServiceConfig::default(),
        }),
        pipeline: PipelineConfig {
            program: "bottledwater".to_string(),
            args: vec![],
            slot_name: "oracle".to_string(),
            topic_prefix: None,
            unique_topic_prefix: true,
        },
        collector: CollectorConfig::default(),
    }
}

#[tokio::test]
async fn database_startup_failure_stops_the_environment() {
    init_test_tracing();
    let _guard = FailpointGuard::setup(&[(START_DATABASE, "return")]);
    let clock = ManualClock::new();
    let mut environment = TestEnvironment::with_clock(config(), clock.clone());

    let error = environment.start().await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::StartupFailure);
    assert!(error.kind().is_fatal());
    assert_eq!(environment.state(), EnvironmentState::Stopped);
    assert_eq!(clock.elapsed(), std::time::Duration::ZERO);
}

#[tokio::test]
async fn failpoint_parameters_select_the_error_kind() {
    init_test_tracing();
    let _guard = FailpointGuard::setup(&[(START_DATABASE, "return(io)")]);
    let mut environment = TestEnvironment::with_clock(config(), ManualClock::new());

    let error = environment.start().await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::IoError);
    assert_eq!(environment.state(), EnvironmentState::Stopped);
    assert!(environment.database().is_err());
}

#[tokio::test]
async fn stopped_environments_refuse_to_restart() {
    init_test_tracing();
    let _guard = FailpointGuard::setup(&[(START_DATABASE, "return")]);
    let mut environment = TestEnvironment::with_clock(config(), ManualClock::new());
    environment.start().await.unwrap_err();

    let error = environment.start().await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidState);
    environment.stop().await;
    assert_eq!(environment.state(), EnvironmentState::Stopped);
}

#[tokio::test]
async fn bus_failpoint_is_not_reached_when_the_database_is_down() {
    init_test_tracing();
    let _guard = FailpointGuard::setup(&[(START_BUS, "panic")]);
    let clock = ManualClock::new();
    let mut environment = TestEnvironment::with_clock(config(), clock.clone());

    let error = environment.start().await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::StartupFailure);
    assert!(error.detail().unwrap().starts_with("database not ready"));
    assert_eq!(clock.elapsed(), std::time::Duration::from_millis(100));
}
