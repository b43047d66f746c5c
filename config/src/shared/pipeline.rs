use serde::Deserialize;

use crate::shared::ValidationError;

/// How the CDC pipeline process is launched.
///
/// The environment appends the format, connection and topic arguments to `args`, so only
/// settings that do not depend on the scenario group belong here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Program of the pipeline, e.g. `bottledwater`.
    pub program: String,
    /// Extra arguments passed before the generated ones.
    #[serde(default)]
    pub args: Vec<String>,
    /// Logical replication slot the pipeline creates; its presence signals readiness.
    #[serde(default = "default_slot_name")]
    pub slot_name: String,
    /// Static prefix for every topic the pipeline publishes to.
    #[serde(default)]
    pub topic_prefix: Option<String>,
    /// Generates a prefix unique to each scenario group, so groups sharing a bus never see
    /// each other's topics. Takes precedence over `topic_prefix`.
    #[serde(default)]
    pub unique_topic_prefix: bool,
}

impl PipelineConfig {
    /// Default replication slot name.
    pub const DEFAULT_SLOT_NAME: &'static str = "oracle";

    /// Validates pipeline settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.program.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.program".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.slot_name.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.slot_name".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn default_slot_name() -> String {
    PipelineConfig::DEFAULT_SLOT_NAME.to_string()
}
