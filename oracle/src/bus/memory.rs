use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::bus::MessageBus;
use crate::error::{ErrorKind, OracleResult};
use crate::types::Message;

#[derive(Debug, Default)]
struct Inner {
    /// Every message ever published, per topic.
    logs: HashMap<String, Vec<Message>>,
    /// Position of the next message to deliver, per subscribed topic.
    positions: HashMap<String, usize>,
    /// Upper bound on the messages returned by a single poll.
    max_poll_records: Option<usize>,
}

/// In-memory message bus for tests.
///
/// Topics are single-partition logs. Subscriptions start from the earliest offset, like the
/// consumers created by the REST proxy adapter. Clones share the same logs, so a producer and a
/// consumer can each hold their own handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty bus that delivers at most `max_poll_records` messages per poll.
    ///
    /// Useful to exercise consumers against partial availability.
    pub fn with_max_poll_records(max_poll_records: usize) -> Self {
        let inner = Inner {
            max_poll_records: Some(max_poll_records),
            ..Inner::default()
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Appends a message to `topic` and returns its offset.
    pub async fn publish(
        &self,
        topic: &str,
        key: Option<Vec<u8>>,
        value: Option<Vec<u8>>,
    ) -> i64 {
        let mut inner = self.inner.lock().await;
        let log = inner.logs.entry(topic.to_string()).or_default();
        let offset = log.len() as i64;
        log.push(Message::new(topic, 0, offset, key, value));

        offset
    }

    /// Returns a copy of every message published to `topic`.
    pub async fn messages(&self, topic: &str) -> Vec<Message> {
        let inner = self.inner.lock().await;
        inner.logs.get(topic).cloned().unwrap_or_default()
    }

    /// Returns the names of all topics that received at least one message.
    pub async fn topics(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut topics: Vec<String> = inner.logs.keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl MessageBus for MemoryBus {
    async fn subscribe(&self, topic: &str) -> OracleResult<()> {
        let mut inner = self.inner.lock().await;
        inner.positions.entry(topic.to_string()).or_insert(0);

        Ok(())
    }

    async fn poll(&self, topic: &str) -> OracleResult<Vec<Message>> {
        let mut inner = self.inner.lock().await;
        let Some(&position) = inner.positions.get(topic) else {
            bail!(
                ErrorKind::BusError,
                "Polled a topic without subscription",
                format!("topic '{topic}' was never subscribed")
            );
        };

        let available = inner.logs.get(topic).map(Vec::len).unwrap_or(0);
        let end = match inner.max_poll_records {
            Some(max) => available.min(position + max),
            None => available,
        };
        let messages = inner
            .logs
            .get(topic)
            .map(|log| log[position..end].to_vec())
            .unwrap_or_default();

        inner.positions.insert(topic.to_string(), end);
        debug!(topic, count = messages.len(), "polled memory bus");

        Ok(messages)
    }
}
