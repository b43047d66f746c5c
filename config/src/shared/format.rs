use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wire encoding the CDC pipeline emits for keys and values.
///
/// One format is fixed per scenario group, both for the pipeline process and for the decoder
/// used to read its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingFormat {
    /// Self-describing JSON documents, one union-tagged entry per column.
    Json,
    /// Avro binary datums framed with a registry schema id.
    Avro,
}

impl EncodingFormat {
    /// All supported formats, in the order the runner exercises them.
    pub const ALL: [EncodingFormat; 2] = [EncodingFormat::Json, EncodingFormat::Avro];

    /// Returns the name passed to the pipeline process.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingFormat::Json => "json",
            EncodingFormat::Avro => "avro",
        }
    }

    /// Returns `true` when decoding this format needs a schema registry.
    pub fn requires_schema_registry(&self) -> bool {
        matches!(self, EncodingFormat::Avro)
    }
}

impl fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(EncodingFormat::Json),
            "avro" => Ok(EncodingFormat::Avro),
            other => Err(format!(
                "{other} is not a supported format. Use either `json` or `avro`."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_format_names() {
        assert_eq!("JSON".parse::<EncodingFormat>(), Ok(EncodingFormat::Json));
        assert_eq!("avro".parse::<EncodingFormat>(), Ok(EncodingFormat::Avro));
        assert!("protobuf".parse::<EncodingFormat>().is_err());
    }

    #[test]
    fn only_avro_needs_a_registry() {
        assert!(!EncodingFormat::Json.requires_schema_registry());
        assert!(EncodingFormat::Avro.requires_schema_registry());
    }

    #[test]
    fn deserializes_from_snake_case() {
        let format: EncodingFormat = serde_json::from_str("\"avro\"").unwrap();
        assert_eq!(format, EncodingFormat::Avro);
    }
}
