use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use config::shared::SchemaRegistryConfig;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, OracleResult};
use crate::oracle_error;

/// Resolves numeric schema ids to schema definitions.
///
/// Registries are append-only: an id, once assigned, always resolves to the same schema.
pub trait SchemaRegistry {
    /// Returns the schema registered under `id`, or `None` if the id is unknown.
    fn schema(&self, id: u32) -> impl Future<Output = OracleResult<Option<String>>> + Send;
}

/// Timeout applied to every request sent to the registry.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    schema: String,
}

/// Client for a Confluent-compatible schema registry.
#[derive(Debug, Clone)]
pub struct HttpSchemaRegistry {
    client: Client,
    url: String,
}

impl HttpSchemaRegistry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &SchemaRegistryConfig) -> Self {
        Self::new(&config.url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SchemaRegistry for HttpSchemaRegistry {
    async fn schema(&self, id: u32) -> OracleResult<Option<String>> {
        let response = self
            .client
            .get(format!("{}/schemas/ids/{id}", self.url))
            .send()
            .await
            .map_err(|err| {
                oracle_error!(
                    ErrorKind::RegistryError,
                    "Request to the schema registry failed",
                    err.to_string(),
                    source: err
                )
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                ErrorKind::RegistryError,
                "Schema registry rejected a lookup",
                format!("schema id {id}: status {status}: {body}")
            );
        }

        let body: SchemaResponse = response.json().await.map_err(|err| {
            oracle_error!(
                ErrorKind::RegistryError,
                "Schema registry returned an invalid response",
                err.to_string(),
                source: err
            )
        })?;
        debug!(id, "fetched schema from registry");

        Ok(Some(body.schema))
    }
}

#[derive(Debug, Default)]
struct Inner {
    schemas: HashMap<u32, String>,
    lookups: usize,
}

/// In-memory schema registry.
///
/// Ids are assigned sequentially from 1. Registering a schema that is already known returns its
/// existing id. Clones share the same schemas.
#[derive(Debug, Clone, Default)]
pub struct MemorySchemaRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `schema` and returns its id.
    pub async fn register(&self, schema: &str) -> u32 {
        let mut inner = self.inner.lock().await;
        if let Some((&id, _)) = inner.schemas.iter().find(|(_, known)| *known == schema) {
            return id;
        }

        let id = inner.schemas.len() as u32 + 1;
        inner.schemas.insert(id, schema.to_string());

        id
    }

    /// Returns how many lookups were served, including lookups of unknown ids.
    pub async fn lookups(&self) -> usize {
        self.inner.lock().await.lookups
    }
}

impl SchemaRegistry for MemorySchemaRegistry {
    async fn schema(&self, id: u32) -> OracleResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        inner.lookups += 1;

        Ok(inner.schemas.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registering_twice_returns_the_same_id() {
        let registry = MemorySchemaRegistry::new();

        let first = registry.register(r#""int""#).await;
        let second = registry.register(r#""string""#).await;
        let again = registry.register(r#""int""#).await;

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(again, 1);
    }

    #[tokio::test]
    async fn unknown_ids_resolve_to_none() {
        let registry = MemorySchemaRegistry::new();

        assert_eq!(registry.schema(42).await.unwrap(), None);
        assert_eq!(registry.lookups().await, 1);
    }

    #[test]
    fn registry_urls_drop_trailing_slashes() {
        let registry = HttpSchemaRegistry::new("http://localhost:8081/");

        assert_eq!(registry.url(), "http://localhost:8081");
    }
}
