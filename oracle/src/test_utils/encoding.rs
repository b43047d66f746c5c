//! Encoders producing payloads in the wire formats understood by the decoders.

use apache_avro::Schema;
use apache_avro::types::Value;

use crate::decoder::avro::{FRAME_PREFIX_LEN, MAGIC_BYTE};
use crate::error::OracleResult;

/// Prefixes an Avro datum with the magic byte and `schema_id`.
pub fn frame(schema_id: u32, datum: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(FRAME_PREFIX_LEN + datum.len());
    payload.push(MAGIC_BYTE);
    payload.extend_from_slice(&schema_id.to_be_bytes());
    payload.extend_from_slice(datum);
    payload
}

/// Encodes `value` with `schema` and frames it with `schema_id`.
pub fn encode_avro(schema_id: u32, schema: &Schema, value: Value) -> OracleResult<Vec<u8>> {
    let datum = apache_avro::to_avro_datum(schema, value)?;

    Ok(frame(schema_id, &datum))
}

/// Serializes a JSON document.
pub fn encode_json(document: &serde_json::Value) -> OracleResult<Vec<u8>> {
    Ok(serde_json::to_vec(document)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_start_with_magic_byte_and_big_endian_id() {
        assert_eq!(frame(258, &[7]), vec![0, 0, 0, 1, 2, 7]);
    }
}
