use serde::Deserialize;

use crate::shared::ServiceConfig;

/// Connection settings for the schema registry used by the Avro format.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchemaRegistryConfig {
    /// Base url of the registry, e.g. `http://localhost:8081`.
    pub url: String,
    /// Lifecycle of the registry process.
    #[serde(default)]
    pub service: ServiceConfig,
}
