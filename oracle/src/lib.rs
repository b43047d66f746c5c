//! Behavioral verification harness for change-data-capture pipelines.
//!
//! The oracle drives a test environment made of a Postgres database, a message bus, an optional
//! schema registry and the CDC pipeline under test. Scenarios mutate tables through the database,
//! collect the resulting change messages from the bus and assert the delivery contract: ordering,
//! key presence, tombstones for deletes and full row images for updates. The same scenarios run
//! unchanged against the JSON and the Avro wire encodings.

pub mod bus;
pub mod collector;
pub mod concurrency;
pub mod database;
pub mod decoder;
pub mod environment;
pub mod error;
pub mod failpoints;
mod macros;
pub mod scenario;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

pub use config::shared::EncodingFormat;
