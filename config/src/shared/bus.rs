use serde::Deserialize;

use crate::shared::ServiceConfig;

/// Connection settings for the message bus.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BusConfig {
    /// Bootstrap brokers handed to the pipeline, e.g. `localhost:9092`.
    pub brokers: String,
    /// Base url of the Kafka REST proxy used by the oracle to consume topics.
    pub rest_proxy_url: String,
    /// Consumer group used for the oracle's consumer instances.
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Lifecycle of the bus processes.
    #[serde(default)]
    pub service: ServiceConfig,
}

fn default_consumer_group() -> String {
    BusConfig::DEFAULT_CONSUMER_GROUP.to_string()
}

impl BusConfig {
    /// Default consumer group name.
    pub const DEFAULT_CONSUMER_GROUP: &'static str = "cdc-oracle";
}
