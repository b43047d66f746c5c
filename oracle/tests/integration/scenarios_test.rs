use std::time::Duration;

use oracle::EncodingFormat;
use oracle::collector::MessageCollector;
use oracle::database::Database;
use oracle::decoder::{FormatDecoder, decode_message};
use oracle::error::ErrorKind;
use oracle::scenario::{Scenario, ScenarioRunner};
use oracle::test_utils::{
    ManualClock, MemoryBus, MemorySchemaRegistry, PipelineFault, SimulatedPipeline,
};
use postgres::params::SqlParam;
use postgres::table::{ColumnType, TableFixture};
use telemetry::tracing::init_test_tracing;

type SimulatedRunner = ScenarioRunner<
    SimulatedPipeline,
    MemoryBus,
    FormatDecoder<MemorySchemaRegistry>,
    ManualClock,
>;

/// Builds a runner whose pipeline publishes to the bus the collector consumes.
fn runner(format: EncodingFormat, fault: Option<PipelineFault>) -> (SimulatedRunner, ManualClock) {
    let bus = MemoryBus::new();
    let registry = MemorySchemaRegistry::new();
    let clock = ManualClock::new();

    let mut pipeline = SimulatedPipeline::new(format, bus.clone(), registry.clone())
        .with_topic_prefix("oracle_test");
    if let Some(fault) = fault {
        pipeline = pipeline.with_fault(fault);
    }

    let collector = MessageCollector::with_clock(bus, clock.clone());
    let decoder = FormatDecoder::for_format(format, registry);
    let runner = ScenarioRunner::new(pipeline, collector, decoder)
        .with_topic_prefix(Some("oracle_test".to_string()))
        .with_timeout(Duration::from_secs(5));

    (runner, clock)
}

#[tokio::test]
async fn json_matrix_passes_against_a_correct_pipeline() {
    init_test_tracing();
    let (mut runner, clock) = runner(EncodingFormat::Json, None);

    let report = runner.run_all().await;

    assert!(report.is_success(), "{report}");
    assert_eq!(report.format(), EncodingFormat::Json);
    assert_eq!(report.outcomes().len(), Scenario::ALL.len());
    assert_eq!(clock.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn avro_matrix_passes_against_a_correct_pipeline() {
    init_test_tracing();
    let (mut runner, _clock) = runner(EncodingFormat::Avro, None);

    let report = runner.run_all().await;

    assert!(report.is_success(), "{report}");
    assert_eq!(report.format(), EncodingFormat::Avro);
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn keyed_inserts_are_published_in_key_order() {
    init_test_tracing();
    for format in [EncodingFormat::Json, EncodingFormat::Avro] {
        let (runner, _clock) = runner(format, None);
        let mut runner = runner.with_insert_count(25);

        runner.run(Scenario::KeyedInsert).await.unwrap();

        assert_eq!(runner.collector().pending("oracle_test.things"), 0);
        assert_eq!(runner.database().row_count("things").await, Some(25));
    }
}

#[tokio::test]
async fn scenarios_only_touch_their_own_topic() {
    init_test_tracing();
    let (mut runner, _clock) = runner(EncodingFormat::Json, None);

    runner.run(Scenario::UnkeyedInsert).await.unwrap();
    runner.run(Scenario::UnkeyedUpdate).await.unwrap();

    assert_eq!(runner.collector().pending("oracle_test.logs"), 0);
    assert_eq!(runner.collector().pending("oracle_test.numbers"), 0);
    assert_eq!(runner.database().row_count("numbers").await, Some(1));
}

#[tokio::test]
async fn running_a_scenario_twice_is_a_name_collision() {
    init_test_tracing();
    let (mut runner, _clock) = runner(EncodingFormat::Json, None);
    runner.run(Scenario::KeyedDelete).await.unwrap();
    let statements = runner.database().statements().await.len();

    let error = runner.run(Scenario::KeyedDelete).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NameCollision);
    assert_eq!(runner.database().statements().await.len(), statements);
}

#[tokio::test]
async fn dropped_tombstones_time_out() {
    init_test_tracing();
    for format in [EncodingFormat::Json, EncodingFormat::Avro] {
        let (mut runner, clock) = runner(format, Some(PipelineFault::DropTombstones));

        let error = runner.run(Scenario::KeyedDelete).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert!(error.detail().unwrap().contains("received 1/2 messages"));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }
}

#[tokio::test]
async fn messages_for_keyless_deletes_are_detected() {
    init_test_tracing();
    for format in [EncodingFormat::Json, EncodingFormat::Avro] {
        let (mut runner, _clock) = runner(format, Some(PipelineFault::PublishKeylessDeletes));

        let error = runner.run(Scenario::UnkeyedDelete).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::AssertionFailure);
        assert_eq!(error.description(), "Message has no value");
    }
}

#[tokio::test]
async fn rekeyed_updates_are_detected() {
    init_test_tracing();
    let (mut runner, _clock) = runner(EncodingFormat::Avro, Some(PipelineFault::RekeyUpdates));

    let error = runner.run(Scenario::KeyedUpdate).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::AssertionFailure);
    assert_eq!(
        error.description(),
        "Messages of the same row have different keys"
    );
}

#[tokio::test]
async fn run_all_continues_past_failures() {
    init_test_tracing();
    let (mut runner, _clock) = runner(EncodingFormat::Json, Some(PipelineFault::DropTombstones));

    let report = runner.run_all().await;

    let failed: Vec<Scenario> = report.failures().map(|outcome| outcome.scenario).collect();
    assert_eq!(failed, vec![Scenario::KeyedDelete]);
    assert_eq!(report.outcomes().len(), Scenario::ALL.len());

    let error = report.into_result().unwrap_err();
    assert_eq!(error.kinds(), vec![ErrorKind::Timeout]);
}

#[tokio::test]
async fn deleting_many_keyed_rows_publishes_one_tombstone_per_row() {
    init_test_tracing();
    for format in [EncodingFormat::Json, EncodingFormat::Avro] {
        let bus = MemoryBus::new();
        let registry = MemorySchemaRegistry::new();
        let pipeline = SimulatedPipeline::new(format, bus.clone(), registry.clone());
        let mut collector = MessageCollector::with_clock(bus, ManualClock::new());
        let decoder = FormatDecoder::for_format(format, registry);
        let table = TableFixture::keyed("crates").with_column("name", ColumnType::Text, false);
        collector.observe("crates").await.unwrap();

        pipeline.execute(&table.create_statement()).await.unwrap();
        pipeline
            .execute_params(
                &table.insert_statement(&["name"], 3),
                &[
                    SqlParam::from("serde"),
                    SqlParam::from("tokio"),
                    SqlParam::from("tracing"),
                ],
            )
            .await
            .unwrap();
        let deleted = pipeline
            .execute(&table.delete_all_statement())
            .await
            .unwrap();
        assert_eq!(deleted, 3);

        let messages = collector
            .collect("crates", 6, Duration::from_secs(5))
            .await
            .unwrap();
        let mut decoded = Vec::new();
        for message in &messages {
            decoded.push(decode_message(&decoder, message).await.unwrap());
        }

        let (inserts, deletes) = decoded.split_at(3);
        for (position, (insert, delete)) in inserts.iter().zip(deletes).enumerate() {
            let key = delete.key.as_ref().unwrap();
            assert_eq!(key.fetch_int("id").unwrap(), position as i64 + 1);
            assert_eq!(delete.key, insert.key);
            assert!(delete.value.is_none(), "{format}: delete {position} has a value");
        }
        assert!(decoded.windows(2).all(|pair| pair[0].index < pair[1].index));
        assert_eq!(collector.pending("crates"), 0);
    }
}
