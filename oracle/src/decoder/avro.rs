use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

use apache_avro::Schema;
use apache_avro::types::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::bail;
use crate::decoder::Decoder;
use crate::decoder::registry::SchemaRegistry;
use crate::error::{ErrorKind, OracleResult};
use crate::types::{DecodedRecord, FieldValue};
use crate::EncodingFormat;

/// First byte of every registry-framed payload.
pub const MAGIC_BYTE: u8 = 0;

/// Length of the frame prefix: the magic byte and a big-endian `u32` schema id.
pub const FRAME_PREFIX_LEN: usize = 5;

/// Splits a registry-framed payload into its schema id and the Avro datum.
pub fn parse_frame(bytes: &[u8]) -> OracleResult<(u32, &[u8])> {
    if bytes.len() < FRAME_PREFIX_LEN {
        bail!(
            ErrorKind::DecodeError,
            "Avro payload is missing its schema id prefix",
            format!("payload has {} bytes", bytes.len())
        );
    }

    if bytes[0] != MAGIC_BYTE {
        bail!(
            ErrorKind::DecodeError,
            "Avro payload has an unknown magic byte",
            format!("found {:#04x}", bytes[0])
        );
    }

    let id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

    Ok((id, &bytes[FRAME_PREFIX_LEN..]))
}

/// Datum source that records whether the decoder asked for bytes past its end.
struct DatumReader<'a> {
    remaining: &'a [u8],
    exhausted: bool,
}

impl<'a> DatumReader<'a> {
    fn new(datum: &'a [u8]) -> Self {
        Self {
            remaining: datum,
            exhausted: false,
        }
    }
}

impl Read for DatumReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !buf.is_empty() && self.remaining.is_empty() {
            self.exhausted = true;
        }

        self.remaining.read(buf)
    }
}

/// Decoder for the Avro encoding.
///
/// Payloads carry the id of their writer schema, which is resolved against a
/// [`SchemaRegistry`]. Resolved schemas are cached for the lifetime of the decoder and shared by
/// its clones; the cache is never invalidated since registries never reassign ids.
#[derive(Debug, Clone)]
pub struct AvroDecoder<R> {
    registry: R,
    cache: Arc<RwLock<HashMap<u32, Arc<Schema>>>>,
}

impl<R> AvroDecoder<R>
where
    R: SchemaRegistry,
{
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Returns the number of schemas held by the cache.
    pub async fn cached_schemas(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Decodes one registry-framed payload.
    pub async fn decode(&self, bytes: Option<&[u8]>) -> OracleResult<Option<DecodedRecord>> {
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let (id, datum) = parse_frame(bytes)?;
        let schema = self.schema(id).await?;

        let mut reader = DatumReader::new(datum);
        let value = apache_avro::from_avro_datum(&schema, &mut reader, None)?;
        // The reader resolves an end of input at a union index to the null branch instead of
        // failing, so any read past the end means the datum was cut short.
        if reader.exhausted {
            bail!(
                ErrorKind::DecodeError,
                "Avro payload is truncated",
                format!("datum of schema {id} ended after {} bytes", datum.len())
            );
        }
        if !reader.remaining.is_empty() {
            bail!(
                ErrorKind::DecodeError,
                "Avro payload has trailing bytes",
                format!(
                    "{} bytes left after the datum of schema {id}",
                    reader.remaining.len()
                )
            );
        }

        match value {
            Value::Record(fields) => Ok(Some(convert_record(fields)?)),
            Value::Union(_, inner) => match *inner {
                Value::Record(fields) => Ok(Some(convert_record(fields)?)),
                other => bail!(
                    ErrorKind::DecodeError,
                    "Avro payload is not a record",
                    format!("schema {id} decoded to {other:?}")
                ),
            },
            other => bail!(
                ErrorKind::DecodeError,
                "Avro payload is not a record",
                format!("schema {id} decoded to {other:?}")
            ),
        }
    }

    async fn schema(&self, id: u32) -> OracleResult<Arc<Schema>> {
        if let Some(schema) = self.cache.read().await.get(&id) {
            debug!(id, "schema cache hit");
            return Ok(schema.clone());
        }

        debug!(id, "schema cache miss");
        let Some(definition) = self.registry.schema(id).await? else {
            bail!(
                ErrorKind::DecodeError,
                "Avro payload references an unknown schema",
                format!("schema id {id} is not registered")
            );
        };

        let schema = Arc::new(Schema::parse_str(&definition)?);
        self.cache.write().await.insert(id, schema.clone());

        Ok(schema)
    }
}

impl<R> Decoder for AvroDecoder<R>
where
    R: SchemaRegistry + Send + Sync,
{
    fn format(&self) -> EncodingFormat {
        EncodingFormat::Avro
    }

    async fn decode_key(
        &self,
        bytes: Option<&[u8]>,
    ) -> OracleResult<Option<DecodedRecord>> {
        self.decode(bytes).await
    }

    async fn decode_value(
        &self,
        bytes: Option<&[u8]>,
    ) -> OracleResult<Option<DecodedRecord>> {
        self.decode(bytes).await
    }
}

fn convert_record(fields: Vec<(String, Value)>) -> OracleResult<DecodedRecord> {
    fields
        .into_iter()
        .map(|(name, value)| Ok((name, convert_value(value)?)))
        .collect()
}

/// Converts a decoded Avro value, resolving unions to their branch.
///
/// Logical types are reduced to their underlying representation.
fn convert_value(value: Value) -> OracleResult<FieldValue> {
    let value = match value {
        Value::Null => FieldValue::Null,
        Value::Boolean(value) => FieldValue::Boolean(value),
        Value::Int(value) | Value::Date(value) | Value::TimeMillis(value) => FieldValue::Int(value),
        Value::Long(value)
        | Value::TimeMicros(value)
        | Value::TimestampMillis(value)
        | Value::TimestampMicros(value)
        | Value::TimestampNanos(value)
        | Value::LocalTimestampMillis(value)
        | Value::LocalTimestampMicros(value)
        | Value::LocalTimestampNanos(value) => FieldValue::Long(value),
        Value::Float(value) => FieldValue::Float(value),
        Value::Double(value) => FieldValue::Double(value),
        Value::Bytes(value) | Value::Fixed(_, value) => FieldValue::Bytes(value),
        Value::String(value) | Value::Enum(_, value) => FieldValue::String(value),
        Value::Union(_, inner) => convert_value(*inner)?,
        Value::Array(values) => FieldValue::Array(
            values
                .into_iter()
                .map(convert_value)
                .collect::<OracleResult<_>>()?,
        ),
        Value::Map(entries) => FieldValue::Map(
            entries
                .into_iter()
                .map(|(name, value)| Ok((name, convert_value(value)?)))
                .collect::<OracleResult<_>>()?,
        ),
        Value::Record(fields) => FieldValue::Record(convert_record(fields)?),
        Value::Decimal(decimal) => FieldValue::Bytes(Vec::<u8>::try_from(&decimal)?),
        Value::BigDecimal(decimal) => FieldValue::String(decimal.to_string()),
        Value::Uuid(uuid) => FieldValue::String(uuid.to_string()),
        Value::Duration(duration) => FieldValue::Bytes(<[u8; 12]>::from(duration).to_vec()),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use apache_avro::types::Value;

    use super::*;
    use crate::decoder::registry::MemorySchemaRegistry;
    use crate::test_utils::encoding::encode_avro;

    const THING_SCHEMA: &str = r#"{
        "type": "record",
        "name": "things",
        "fields": [
            {"name": "id", "type": "int"},
            {"name": "thing", "type": ["null", "string"]}
        ]
    }"#;

    async fn registry_with_thing_schema() -> (MemorySchemaRegistry, u32, Schema) {
        let registry = MemorySchemaRegistry::new();
        let id = registry.register(THING_SCHEMA).await;
        let schema = Schema::parse_str(THING_SCHEMA).unwrap();
        (registry, id, schema)
    }

    fn thing(id: i32, thing: Option<&str>) -> Value {
        let thing = match thing {
            Some(thing) => Value::Union(1, Box::new(Value::String(thing.to_string()))),
            None => Value::Union(0, Box::new(Value::Null)),
        };
        Value::Record(vec![("id".to_string(), Value::Int(id)), ("thing".to_string(), thing)])
    }

    #[tokio::test]
    async fn unions_are_resolved_to_their_branch() {
        let (registry, id, schema) = registry_with_thing_schema().await;
        let decoder = AvroDecoder::new(registry);

        let payload = encode_avro(id, &schema, thing(1, Some("one"))).unwrap();
        let record = decoder.decode(Some(payload.as_slice())).await.unwrap().unwrap();

        assert_eq!(record.get("id"), Some(&FieldValue::Int(1)));
        assert_eq!(
            record.get("thing"),
            Some(&FieldValue::String("one".to_string()))
        );

        let payload = encode_avro(id, &schema, thing(2, None)).unwrap();
        let record = decoder.decode(Some(payload.as_slice())).await.unwrap().unwrap();
        assert_eq!(record.get("thing"), Some(&FieldValue::Null));
    }

    #[tokio::test]
    async fn schemas_are_fetched_once() {
        let (registry, id, schema) = registry_with_thing_schema().await;
        let decoder = AvroDecoder::new(registry.clone());

        for index in 0..3 {
            let payload = encode_avro(id, &schema, thing(index, None)).unwrap();
            decoder.decode(Some(payload.as_slice())).await.unwrap();
        }

        assert_eq!(registry.lookups().await, 1);
        assert_eq!(decoder.cached_schemas().await, 1);
    }

    #[tokio::test]
    async fn absent_payloads_decode_to_none() {
        let decoder = AvroDecoder::new(MemorySchemaRegistry::new());

        assert_eq!(decoder.decode(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_payloads_are_decode_errors() {
        let (registry, id, schema) = registry_with_thing_schema().await;
        let decoder = AvroDecoder::new(registry);
        let valid = encode_avro(id, &schema, thing(1, Some("one"))).unwrap();

        let mut wrong_magic = valid.clone();
        wrong_magic[0] = 1;
        let mut unknown_id = valid.clone();
        unknown_id[4] = 99;
        let mut trailing = valid.clone();
        trailing.push(0);
        let truncated = valid[..valid.len() - 2].to_vec();

        for payload in [
            vec![],
            vec![0, 0, 0],
            wrong_magic,
            unknown_id,
            trailing,
            truncated,
        ] {
            let error = decoder.decode(Some(payload.as_slice())).await.unwrap_err();
            assert_eq!(error.kind(), ErrorKind::DecodeError, "payload {payload:?}");
        }
    }

    #[tokio::test]
    async fn datums_cut_short_inside_a_union_are_decode_errors() {
        let (registry, id, schema) = registry_with_thing_schema().await;
        let decoder = AvroDecoder::new(registry);
        let valid = encode_avro(id, &schema, thing(1, Some("one"))).unwrap();
        assert_eq!(valid, vec![0, 0, 0, 0, id as u8, 2, 2, 6, 111, 110, 101]);

        for cut in 1..=5 {
            let truncated = &valid[..valid.len() - cut];
            let error = decoder.decode(Some(truncated)).await.unwrap_err();
            assert_eq!(error.kind(), ErrorKind::DecodeError, "cut {cut} bytes");
        }
    }

    #[tokio::test]
    async fn decimals_decode_to_their_unscaled_bytes() {
        let schema_json = r#"{
            "type": "record",
            "name": "prices",
            "fields": [
                {"name": "amount", "type": {"type": "bytes", "logicalType": "decimal", "precision": 6, "scale": 2}}
            ]
        }"#;
        let registry = MemorySchemaRegistry::new();
        let id = registry.register(schema_json).await;
        let schema = Schema::parse_str(schema_json).unwrap();
        let decoder = AvroDecoder::new(registry);

        let value = Value::Record(vec![(
            "amount".to_string(),
            Value::Decimal(apache_avro::Decimal::from(vec![1, 24])),
        )]);
        let payload = encode_avro(id, &schema, value).unwrap();
        let record = decoder.decode(Some(payload.as_slice())).await.unwrap().unwrap();

        assert_eq!(record.get("amount"), Some(&FieldValue::Bytes(vec![1, 24])));
    }

    #[tokio::test]
    async fn non_record_payloads_are_decode_errors() {
        let registry = MemorySchemaRegistry::new();
        let id = registry.register(r#""int""#).await;
        let schema = Schema::parse_str(r#""int""#).unwrap();
        let decoder = AvroDecoder::new(registry);

        let payload = encode_avro(id, &schema, Value::Int(3)).unwrap();
        let error = decoder.decode(Some(payload.as_slice())).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::DecodeError);
        assert_eq!(error.description(), "Avro payload is not a record");
    }

    #[tokio::test]
    async fn unparsable_schemas_are_decode_errors() {
        let registry = MemorySchemaRegistry::new();
        let id = registry.register("{not a schema").await;
        let decoder = AvroDecoder::new(registry);

        let error = decoder
            .decode(Some(&[0, 0, 0, 0, id as u8, 2][..]))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::DecodeError);
    }

    #[test]
    fn frames_carry_a_big_endian_schema_id() {
        let (id, datum) = parse_frame(&[0, 0, 0, 1, 2, 42]).unwrap();

        assert_eq!(id, 258);
        assert_eq!(datum, &[42]);
    }
}
