use std::time::Duration;

use serde::Deserialize;

use crate::Config;
use crate::shared::{
    BusConfig, CollectorConfig, EncodingFormat, PgConnectionConfig, PipelineConfig,
    SchemaRegistryConfig, ValidationError,
};

/// Complete configuration of the oracle for one deployment of the CDC pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Format exercised when no format is chosen explicitly.
    #[serde(default = "default_format")]
    pub format: EncodingFormat,
    /// Upper bound, in milliseconds, for each collaborator to become ready.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Pause, in milliseconds, between two readiness probes.
    #[serde(default = "default_startup_poll_interval_ms")]
    pub startup_poll_interval_ms: u64,
    /// Database the pipeline captures changes from.
    pub database: PgConnectionConfig,
    /// Message bus the pipeline publishes to.
    pub bus: BusConfig,
    /// Schema registry, required by the Avro format.
    #[serde(default)]
    pub schema_registry: Option<SchemaRegistryConfig>,
    /// The CDC pipeline process.
    pub pipeline: PipelineConfig,
    /// Message collection settings.
    #[serde(default)]
    pub collector: CollectorConfig,
}

impl HarnessConfig {
    /// Default startup timeout in milliseconds.
    pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 60_000;

    /// Default interval between readiness probes in milliseconds.
    pub const DEFAULT_STARTUP_POLL_INTERVAL_MS: u64 = 500;

    /// Validates the configuration for a scenario group running `format`.
    pub fn validate_for(&self, format: EncodingFormat) -> Result<(), ValidationError> {
        if format.requires_schema_registry() && self.schema_registry.is_none() {
            return Err(ValidationError::MissingSchemaRegistry);
        }

        if self.startup_timeout_ms == 0 {
            return Err(ValidationError::must_be_positive("startup_timeout_ms"));
        }

        if self.startup_poll_interval_ms == 0 {
            return Err(ValidationError::must_be_positive(
                "startup_poll_interval_ms",
            ));
        }

        self.pipeline.validate()?;
        self.collector.validate()?;

        Ok(())
    }

    /// Validates the configuration for the default format.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_for(self.format)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn startup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.startup_poll_interval_ms)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collector.timeout_ms)
    }

    pub fn collect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.collector.poll_interval_ms)
    }
}

impl Config for HarnessConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[
        "pipeline.args",
        "database.service.start.args",
        "database.service.stop.args",
        "bus.service.start.args",
        "bus.service.stop.args",
        "schema_registry.service.start.args",
        "schema_registry.service.stop.args",
    ];
}

fn default_format() -> EncodingFormat {
    EncodingFormat::Json
}

fn default_startup_timeout_ms() -> u64 {
    HarnessConfig::DEFAULT_STARTUP_TIMEOUT_MS
}

fn default_startup_poll_interval_ms() -> u64 {
    HarnessConfig::DEFAULT_STARTUP_POLL_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: serde_json::Value) -> HarnessConfig {
        serde_json::from_value(value).unwrap()
    }

    fn minimal() -> serde_json::Value {
        serde_json::json!({
            "database": {
                "host": "localhost",
                "port": 5432,
                "name": "postgres",
                "username": "postgres"
            },
            "bus": {
                "brokers": "localhost:9092",
                "rest_proxy_url": "http://localhost:8082"
            },
            "pipeline": {
                "program": "bottledwater"
            }
        })
    }

    #[test]
    fn minimal_configuration_uses_defaults() {
        let config = parse(minimal());

        assert_eq!(config.format, EncodingFormat::Json);
        assert_eq!(config.collector.timeout_ms, CollectorConfig::DEFAULT_TIMEOUT_MS);
        assert_eq!(config.pipeline.slot_name, PipelineConfig::DEFAULT_SLOT_NAME);
        assert_eq!(config.bus.consumer_group, BusConfig::DEFAULT_CONSUMER_GROUP);
        assert!(!config.database.service.is_managed());
        config.validate().unwrap();
    }

    #[test]
    fn avro_requires_a_schema_registry() {
        let config = parse(minimal());

        assert!(matches!(
            config.validate_for(EncodingFormat::Avro),
            Err(ValidationError::MissingSchemaRegistry)
        ));

        let mut value = minimal();
        value["schema_registry"] = serde_json::json!({ "url": "http://localhost:8081" });
        parse(value).validate_for(EncodingFormat::Avro).unwrap();
    }

    #[test]
    fn zero_durations_are_rejected() {
        let mut value = minimal();
        value["collector"] = serde_json::json!({ "poll_interval_ms": 0 });

        let error = parse(value).validate().unwrap_err();
        assert!(error.to_string().contains("collector.poll_interval_ms"));
    }
}
