//! Decoding of change message payloads.
//!
//! [`Decoder`] turns raw key and value payloads into [`crate::types::DecodedRecord`]s. The JSON
//! variant is self-describing; the Avro variant resolves schema ids against a schema registry.
//! A scenario group uses a single variant, picked once from the environment's encoding format.

pub mod avro;
mod base;
pub mod json;
pub mod registry;

pub use base::{DecodedMessage, Decoder, FormatDecoder, decode_message};
