use oracle::EncodingFormat;
use oracle::database::Database;
use oracle::decoder::{Decoder, FormatDecoder, decode_message};
use oracle::error::ErrorKind;
use oracle::test_utils::{MemoryBus, MemorySchemaRegistry, SimulatedPipeline};
use postgres::params::SqlParam;
use postgres::table::{ColumnType, TableFixture};
use telemetry::tracing::init_test_tracing;

fn profiles() -> TableFixture {
    TableFixture::keyed("profiles")
        .with_column("nickname", ColumnType::Text, true)
        .with_column("age", ColumnType::Integer, false)
}

/// Publishes one row of `profiles` in `format` and returns the bus and registry holding it.
async fn publish_profile(format: EncodingFormat) -> (MemoryBus, MemorySchemaRegistry) {
    let bus = MemoryBus::new();
    let registry = MemorySchemaRegistry::new();
    let pipeline = SimulatedPipeline::new(format, bus.clone(), registry.clone());
    let table = profiles();

    pipeline.execute(&table.create_statement()).await.unwrap();
    pipeline
        .execute_params(
            &table.insert_statement(&["nickname", "age"], 1),
            &[SqlParam::from("ferris"), SqlParam::Int(9)],
        )
        .await
        .unwrap();

    (bus, registry)
}

#[tokio::test]
async fn both_encodings_decode_to_the_same_row() {
    init_test_tracing();
    let mut rows = Vec::new();

    for format in [EncodingFormat::Json, EncodingFormat::Avro] {
        let (bus, registry) = publish_profile(format).await;
        let decoder = FormatDecoder::for_format(format, registry);
        assert_eq!(decoder.format(), format);

        let messages = bus.messages("profiles").await;
        let decoded = decode_message(&decoder, &messages[0]).await.unwrap();
        let key = decoded.key.unwrap();
        let value = decoded.value.unwrap();

        rows.push((
            key.fetch_int("id").unwrap(),
            value.fetch_string("nickname").unwrap().to_string(),
            value.fetch_int("age").unwrap(),
        ));
    }

    assert_eq!(rows[0], (1, "ferris".to_string(), 9));
    assert_eq!(rows[0], rows[1]);
}

#[tokio::test]
async fn decoding_the_same_bytes_twice_is_equal() {
    init_test_tracing();
    for format in [EncodingFormat::Json, EncodingFormat::Avro] {
        let (bus, registry) = publish_profile(format).await;
        let decoder = FormatDecoder::for_format(format, registry);
        let message = bus.messages("profiles").await.remove(0);

        let first = decode_message(&decoder, &message).await.unwrap();
        let second = decode_message(&decoder, &message).await.unwrap();

        assert_eq!(first, second);
    }
}

#[tokio::test]
async fn decoders_never_accept_the_other_encoding() {
    init_test_tracing();
    let (json_bus, _) = publish_profile(EncodingFormat::Json).await;
    let (avro_bus, registry) = publish_profile(EncodingFormat::Avro).await;

    let json_message = json_bus.messages("profiles").await.remove(0);
    let avro_message = avro_bus.messages("profiles").await.remove(0);

    let avro = FormatDecoder::for_format(EncodingFormat::Avro, registry.clone());
    let error = avro.decode_value(json_message.value()).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DecodeError);

    let json = FormatDecoder::for_format(EncodingFormat::Json, registry);
    let error = json.decode_value(avro_message.value()).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DecodeError);
}
