//! Postgres helpers used by the oracle to drive the database the CDC pipeline captures.

pub mod params;
pub mod table;
pub mod tokio;
