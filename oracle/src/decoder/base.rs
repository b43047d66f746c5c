use std::future::Future;

use crate::decoder::avro::AvroDecoder;
use crate::decoder::json::JsonDecoder;
use crate::decoder::registry::SchemaRegistry;
use crate::error::OracleResult;
use crate::types::{DecodedRecord, Message};
use crate::EncodingFormat;

/// Decodes the key and value payloads of change messages.
///
/// An absent payload decodes to `None`. Malformed payloads fail with
/// [`crate::error::ErrorKind::DecodeError`]; partial results are never returned.
pub trait Decoder {
    /// Returns the format this decoder understands.
    fn format(&self) -> EncodingFormat;

    fn decode_key(
        &self,
        bytes: Option<&[u8]>,
    ) -> impl Future<Output = OracleResult<Option<DecodedRecord>>> + Send;

    fn decode_value(
        &self,
        bytes: Option<&[u8]>,
    ) -> impl Future<Output = OracleResult<Option<DecodedRecord>>> + Send;
}

/// Decoder for the format an environment was configured with.
#[derive(Debug, Clone)]
pub enum FormatDecoder<R> {
    Json(JsonDecoder),
    Avro(AvroDecoder<R>),
}

impl<R> FormatDecoder<R>
where
    R: SchemaRegistry,
{
    /// Creates the decoder for `format`. The registry is only used by the Avro variant.
    pub fn for_format(format: EncodingFormat, registry: R) -> Self {
        match format {
            EncodingFormat::Json => FormatDecoder::Json(JsonDecoder::new()),
            EncodingFormat::Avro => FormatDecoder::Avro(AvroDecoder::new(registry)),
        }
    }
}

impl<R> Decoder for FormatDecoder<R>
where
    R: SchemaRegistry + Send + Sync,
{
    fn format(&self) -> EncodingFormat {
        match self {
            FormatDecoder::Json(decoder) => decoder.format(),
            FormatDecoder::Avro(decoder) => decoder.format(),
        }
    }

    async fn decode_key(&self, bytes: Option<&[u8]>) -> OracleResult<Option<DecodedRecord>> {
        match self {
            FormatDecoder::Json(decoder) => decoder.decode_key(bytes).await,
            FormatDecoder::Avro(decoder) => decoder.decode_key(bytes).await,
        }
    }

    async fn decode_value(&self, bytes: Option<&[u8]>) -> OracleResult<Option<DecodedRecord>> {
        match self {
            FormatDecoder::Json(decoder) => decoder.decode_value(bytes).await,
            FormatDecoder::Avro(decoder) => decoder.decode_value(bytes).await,
        }
    }
}

/// Key and value of a message after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub index: u64,
    pub key: Option<DecodedRecord>,
    pub value: Option<DecodedRecord>,
}

/// Decodes both payloads of `message`.
pub async fn decode_message<D>(decoder: &D, message: &Message) -> OracleResult<DecodedMessage>
where
    D: Decoder,
{
    let key = decoder.decode_key(message.key()).await?;
    let value = decoder.decode_value(message.value()).await?;

    Ok(DecodedMessage {
        index: message.index,
        key,
        value,
    })
}
