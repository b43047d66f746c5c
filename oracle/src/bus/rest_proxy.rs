//! [`MessageBus`] backed by the consumer API of a Kafka REST proxy (v2).
//!
//! Every subscribed topic gets its own consumer instance, so polls of one topic never return
//! messages of another. Instances use the binary embedded format, which transports keys and values
//! as base64 strings, and start from the earliest offset.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use config::shared::BusConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bail;
use crate::bus::MessageBus;
use crate::error::{ErrorKind, OracleError, OracleResult};
use crate::oracle_error;
use crate::types::Message;

const V2_CONTENT_TYPE: &str = "application/vnd.kafka.v2+json";
const BINARY_ACCEPT: &str = "application/vnd.kafka.binary.v2+json";

/// Error code of a 404 caused by a topic that does not exist yet.
const UNKNOWN_TOPIC_ERROR_CODE: i64 = 40401;

/// Timeout applied to every request sent to the proxy.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct CreateConsumerRequest<'a> {
    name: &'a str,
    format: &'static str,
    #[serde(rename = "auto.offset.reset")]
    auto_offset_reset: &'static str,
    #[serde(rename = "auto.commit.enable")]
    auto_commit_enable: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreateConsumerResponse {
    instance_id: String,
    base_uri: String,
}

#[derive(Debug, Serialize)]
struct SubscriptionRequest<'a> {
    topics: [&'a str; 1],
}

/// Error body returned by the proxy, e.g. `{"error_code": 40403, "message": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error_code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    topic: String,
    key: Option<String>,
    value: Option<String>,
    partition: i32,
    offset: i64,
}

/// A consumer instance created on the proxy.
#[derive(Debug, Clone)]
struct ConsumerInstance {
    instance_id: String,
    base_uri: String,
}

/// Message bus client speaking the Kafka REST proxy v2 consumer protocol.
#[derive(Debug)]
pub struct RestProxyBus {
    client: Client,
    base_url: String,
    group: String,
    consumers: Mutex<HashMap<String, ConsumerInstance>>,
}

impl RestProxyBus {
    /// Creates a client for the proxy at `base_url`.
    ///
    /// `consumer_group` is suffixed with a random id so every client consumes the topics from
    /// the beginning instead of resuming from offsets committed by an earlier run.
    pub fn new(base_url: impl Into<String>, consumer_group: &str) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let group = format!("{consumer_group}-{}", Uuid::new_v4().simple());

        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url,
            group,
            consumers: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a client from the bus section of the configuration.
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(&config.rest_proxy_url, &config.consumer_group)
    }

    /// Returns the consumer group used by this client.
    pub fn group(&self) -> &str {
        &self.group
    }

    async fn create_consumer(&self, topic: &str) -> OracleResult<ConsumerInstance> {
        let name = format!("oracle-{}", Uuid::new_v4().simple());
        let request = CreateConsumerRequest {
            name: &name,
            format: "binary",
            auto_offset_reset: "earliest",
            auto_commit_enable: "false",
        };

        let response = self
            .client
            .post(format!("{}/consumers/{}", self.base_url, self.group))
            .header(reqwest::header::CONTENT_TYPE, V2_CONTENT_TYPE)
            .json(&request)
            .send()
            .await
            .map_err(bus_request_failed)?;
        let response = ensure_success(response, "Failed to create a consumer instance").await?;
        let created: CreateConsumerResponse = response.json().await.map_err(bus_request_failed)?;

        let subscription = SubscriptionRequest { topics: [topic] };
        let response = self
            .client
            .post(format!("{}/subscription", created.base_uri))
            .header(reqwest::header::CONTENT_TYPE, V2_CONTENT_TYPE)
            .json(&subscription)
            .send()
            .await
            .map_err(bus_request_failed)?;
        ensure_success(response, "Failed to subscribe a consumer instance").await?;

        info!(topic, instance_id = %created.instance_id, group = %self.group, "subscribed to topic");

        Ok(ConsumerInstance {
            instance_id: created.instance_id,
            base_uri: created.base_uri,
        })
    }

    async fn consumer(&self, topic: &str) -> OracleResult<ConsumerInstance> {
        let consumers = self.consumers.lock().await;
        match consumers.get(topic) {
            Some(consumer) => Ok(consumer.clone()),
            None => bail!(
                ErrorKind::BusError,
                "Polled a topic without subscription",
                format!("topic '{topic}' was never subscribed")
            ),
        }
    }
}

impl MessageBus for RestProxyBus {
    async fn subscribe(&self, topic: &str) -> OracleResult<()> {
        let mut consumers = self.consumers.lock().await;
        if consumers.contains_key(topic) {
            return Ok(());
        }

        let consumer = self.create_consumer(topic).await?;
        consumers.insert(topic.to_string(), consumer);

        Ok(())
    }

    async fn poll(&self, topic: &str) -> OracleResult<Vec<Message>> {
        let consumer = self.consumer(topic).await?;

        let response = self
            .client
            .get(format!("{}/records", consumer.base_uri))
            .header(reqwest::header::ACCEPT, BINARY_ACCEPT)
            .send()
            .await
            .map_err(bus_request_failed)?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.map_err(bus_request_failed)?;
            return records_not_found(topic, &body);
        }

        let response = ensure_success(response, "Failed to fetch records").await?;
        let records: Vec<RecordResponse> = response.json().await.map_err(bus_request_failed)?;
        debug!(topic, count = records.len(), "polled rest proxy");

        records
            .into_iter()
            .map(|record| {
                Ok(Message::new(
                    record.topic,
                    record.partition,
                    record.offset,
                    decode_payload(record.key)?,
                    decode_payload(record.value)?,
                ))
            })
            .collect()
    }

    async fn close(&self) -> OracleResult<()> {
        let mut consumers = self.consumers.lock().await;
        let mut errors = Vec::new();

        for (topic, consumer) in consumers.drain() {
            let result = self
                .client
                .delete(&consumer.base_uri)
                .header(reqwest::header::CONTENT_TYPE, V2_CONTENT_TYPE)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!(topic, instance_id = %consumer.instance_id, "deleted consumer instance");
                }
                Ok(response) => {
                    warn!(topic, status = %response.status(), "failed to delete consumer instance");
                    errors.push(oracle_error!(
                        ErrorKind::BusError,
                        "Failed to delete a consumer instance",
                        format!("topic '{topic}': status {}", response.status())
                    ));
                }
                Err(err) => {
                    warn!(topic, error = %err, "failed to delete consumer instance");
                    errors.push(bus_request_failed(err));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

fn bus_request_failed(err: reqwest::Error) -> OracleError {
    oracle_error!(
        ErrorKind::BusError,
        "Request to the REST proxy failed",
        err.to_string(),
        source: err
    )
}

async fn ensure_success(
    response: reqwest::Response,
    description: &'static str,
) -> OracleResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    bail!(ErrorKind::BusError, description, format!("status {status}: {body}"));
}

/// Maps a 404 answer of the records endpoint.
///
/// Only an unknown topic is an empty poll. Any other 404, such as an expired consumer instance
/// (`40403`), is a bus failure.
fn records_not_found(topic: &str, body: &str) -> OracleResult<Vec<Message>> {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error) if error.error_code == UNKNOWN_TOPIC_ERROR_CODE => {
            debug!(topic, "topic not available yet");
            Ok(Vec::new())
        }
        Ok(error) => bail!(
            ErrorKind::BusError,
            "REST proxy could not serve records",
            format!(
                "topic '{topic}': error {}: {}",
                error.error_code, error.message
            )
        ),
        Err(_) => bail!(
            ErrorKind::BusError,
            "REST proxy could not serve records",
            format!("topic '{topic}': status 404: {body}")
        ),
    }
}

fn decode_payload(payload: Option<String>) -> OracleResult<Option<Vec<u8>>> {
    payload
        .map(|encoded| {
            STANDARD.decode(encoded.as_bytes()).map_err(|err| {
                oracle_error!(
                    ErrorKind::BusError,
                    "REST proxy returned an invalid base64 payload",
                    err.to_string(),
                    source: err
                )
            })
        })
        .transpose()
}
