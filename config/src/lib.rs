//! Configuration types and loading for the CDC delivery oracle.
//!
//! The [`shared`] module holds the typed configuration consumed by the oracle and the runner,
//! while [`load_config`] assembles it from files under `configuration/` and `ORACLE_` prefixed
//! environment variables.

pub mod environment;
mod load;
pub mod shared;

pub use load::{Config, LoadConfigError, load_config, load_config_from};
