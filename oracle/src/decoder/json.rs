use serde_json::{Map, Number, Value};

use crate::bail;
use crate::decoder::Decoder;
use crate::error::{ErrorKind, OracleResult};
use crate::types::{DecodedRecord, FieldValue};
use crate::EncodingFormat;

/// Type tags of the Avro primitive types, as used by the JSON encoding of unions.
const PRIMITIVE_TAGS: [&str; 8] = [
    "null", "boolean", "int", "long", "float", "double", "bytes", "string",
];

/// Decoder for the JSON encoding.
///
/// Documents are objects whose fields use the JSON encoding of Avro unions: every leaf is a
/// single-entry object mapping a type tag to the value, e.g. `{"id": {"int": 1}}`. Tagged values
/// are kept as [`FieldValue::Union`] so callers can inspect the branch; the accessors of
/// [`DecodedRecord`] unwrap them.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl JsonDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decodes one JSON document. The literal `null` decodes to `None`.
    pub fn decode(&self, bytes: Option<&[u8]>) -> OracleResult<Option<DecodedRecord>> {
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        match serde_json::from_slice::<Value>(bytes)? {
            Value::Null => Ok(None),
            Value::Object(fields) => Ok(Some(decode_record(fields)?)),
            other => bail!(
                ErrorKind::DecodeError,
                "JSON payload is not an object",
                format!("found {}", json_type_name(&other))
            ),
        }
    }
}

impl Decoder for JsonDecoder {
    fn format(&self) -> EncodingFormat {
        EncodingFormat::Json
    }

    async fn decode_key(&self, bytes: Option<&[u8]>) -> OracleResult<Option<DecodedRecord>> {
        self.decode(bytes)
    }

    async fn decode_value(&self, bytes: Option<&[u8]>) -> OracleResult<Option<DecodedRecord>> {
        self.decode(bytes)
    }
}

fn decode_record(fields: Map<String, Value>) -> OracleResult<DecodedRecord> {
    fields
        .into_iter()
        .map(|(name, value)| Ok((name, decode_field(value)?)))
        .collect()
}

fn decode_field(value: Value) -> OracleResult<FieldValue> {
    let decoded = match value {
        Value::Null => FieldValue::Null,
        Value::Bool(value) => FieldValue::Boolean(value),
        Value::Number(number) => decode_number(&number),
        Value::String(value) => FieldValue::String(value),
        Value::Array(values) => FieldValue::Array(
            values
                .into_iter()
                .map(decode_field)
                .collect::<OracleResult<_>>()?,
        ),
        Value::Object(entries) => decode_object(entries)?,
    };

    Ok(decoded)
}

/// Single-entry objects are union branches, every other object is a nested record.
fn decode_object(entries: Map<String, Value>) -> OracleResult<FieldValue> {
    if entries.len() != 1 {
        return Ok(FieldValue::Record(decode_record(entries)?));
    }

    let Some((branch, value)) = entries.into_iter().next() else {
        return Ok(FieldValue::Record(DecodedRecord::new()));
    };
    let value = if PRIMITIVE_TAGS.contains(&branch.as_str()) {
        decode_tagged(&branch, value)?
    } else {
        decode_field(value)?
    };

    Ok(FieldValue::Union {
        branch,
        value: Box::new(value),
    })
}

fn decode_number(number: &Number) -> FieldValue {
    match number.as_i64() {
        Some(value) => FieldValue::Long(value),
        None => FieldValue::Double(number.as_f64().unwrap_or(f64::NAN)),
    }
}

/// Decodes the payload of a union branch tagged with a primitive type.
fn decode_tagged(tag: &str, value: Value) -> OracleResult<FieldValue> {
    let decoded = match (tag, value) {
        ("null", Value::Null) => FieldValue::Null,
        ("boolean", Value::Bool(value)) => FieldValue::Boolean(value),
        ("int", Value::Number(number)) => {
            match number.as_i64().and_then(|value| i32::try_from(value).ok()) {
                Some(value) => FieldValue::Int(value),
                None => bail!(
                    ErrorKind::DecodeError,
                    "JSON int is out of range",
                    format!("{number} does not fit in 32 bits")
                ),
            }
        }
        ("long", Value::Number(number)) => match number.as_i64() {
            Some(value) => FieldValue::Long(value),
            None => bail!(
                ErrorKind::DecodeError,
                "JSON long is out of range",
                format!("{number} does not fit in 64 bits")
            ),
        },
        ("float", Value::Number(number)) => {
            FieldValue::Float(number.as_f64().unwrap_or(f64::NAN) as f32)
        }
        ("double", Value::Number(number)) => {
            FieldValue::Double(number.as_f64().unwrap_or(f64::NAN))
        }
        ("bytes", Value::String(value)) => FieldValue::Bytes(decode_latin1(&value)?),
        ("string", Value::String(value)) => FieldValue::String(value),
        (tag, other) => bail!(
            ErrorKind::DecodeError,
            "JSON union branch does not match its type tag",
            format!("branch '{tag}' holds {}", json_type_name(&other))
        ),
    };

    Ok(decoded)
}

/// Avro's JSON encoding maps every byte to the code point of the same value.
fn decode_latin1(value: &str) -> OracleResult<Vec<u8>> {
    value
        .chars()
        .map(|character| match u8::try_from(u32::from(character)) {
            Ok(byte) => Ok(byte),
            Err(_) => bail!(
                ErrorKind::DecodeError,
                "JSON bytes contain a character above U+00FF",
                format!("found {character:?}")
            ),
        })
        .collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> OracleResult<Option<DecodedRecord>> {
        JsonDecoder::new().decode(Some(json.as_bytes()))
    }

    #[test]
    fn tagged_fields_become_unions() {
        let record = decode(r#"{"id": {"int": 1}, "thing": {"string": "one"}}"#)
            .unwrap()
            .unwrap();

        assert_eq!(
            record.get("id"),
            Some(&FieldValue::Union {
                branch: "int".to_string(),
                value: Box::new(FieldValue::Int(1)),
            })
        );
        assert_eq!(record.fetch_int("id").unwrap(), 1);
        assert_eq!(record.fetch_string("thing").unwrap(), "one");
    }

    #[test]
    fn absent_payloads_and_null_documents_decode_to_none() {
        assert_eq!(JsonDecoder::new().decode(None).unwrap(), None);
        assert_eq!(decode("null").unwrap(), None);
    }

    #[test]
    fn null_fields_are_kept() {
        let record = decode(r#"{"widget": null}"#).unwrap().unwrap();

        assert_eq!(record.get("widget"), Some(&FieldValue::Null));
    }

    #[test]
    fn named_type_unions_are_decoded_recursively() {
        let record = decode(r#"{"address": {"com.example.Address": {"street": {"string": "Main"}, "number": {"int": 4}}}}"#)
            .unwrap()
            .unwrap();

        let FieldValue::Record(address) = record.fetch("address").unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(address.fetch_string("street").unwrap(), "Main");
        assert_eq!(address.fetch_int("number").unwrap(), 4);
    }

    #[test]
    fn bytes_use_latin1_code_points() {
        let record = decode(r#"{"data": {"bytes": "\u0000ÿA"}}"#).unwrap().unwrap();

        assert_eq!(
            record.fetch("data").unwrap(),
            &FieldValue::Bytes(vec![0x00, 0xff, b'A'])
        );
    }

    #[test]
    fn bare_scalars_keep_their_natural_type() {
        let record = decode(r#"{"count": 3, "ratio": 0.5, "ok": true, "tags": ["a"]}"#)
            .unwrap()
            .unwrap();

        assert_eq!(record.fetch("count").unwrap(), &FieldValue::Long(3));
        assert_eq!(record.fetch("ratio").unwrap(), &FieldValue::Double(0.5));
        assert_eq!(record.fetch("ok").unwrap(), &FieldValue::Boolean(true));
        assert_eq!(
            record.fetch("tags").unwrap(),
            &FieldValue::Array(vec![FieldValue::String("a".to_string())])
        );
    }

    #[test]
    fn malformed_payloads_are_decode_errors() {
        for payload in [
            "{",
            "[1, 2]",
            "42",
            r#"{"id": {"int": 4294967296}}"#,
            r#"{"id": {"int": "1"}}"#,
            r#"{"data": {"bytes": "Ā"}}"#,
        ] {
            let error = decode(payload).unwrap_err();
            assert_eq!(error.kind(), ErrorKind::DecodeError, "payload {payload}");
        }
    }

    #[test]
    fn decoding_is_repeatable() {
        let payload = br#"{"id": {"int": 9}, "thing": {"int": 9}}"#;
        let decoder = JsonDecoder::new();

        assert_eq!(
            decoder.decode(Some(&payload[..])).unwrap(),
            decoder.decode(Some(&payload[..])).unwrap()
        );
    }
}
