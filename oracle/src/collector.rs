use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::{debug, info};

use crate::bail;
use crate::bus::MessageBus;
use crate::concurrency::clock::{Clock, TokioClock, deadline_after};
use crate::error::{ErrorKind, OracleResult};
use crate::types::Message;

/// Default pause between two polls of the bus.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default upper bound for collecting the messages expected by a scenario.
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct TopicState {
    /// Messages received but not yet returned by [`MessageCollector::collect`].
    backlog: VecDeque<Message>,
    /// Arrival index assigned to the next received message.
    next_index: u64,
}

/// Collects bounded, ordered sequences of messages from topics of a [`MessageBus`].
///
/// Delivery is asynchronous with respect to the database mutations that trigger it, so
/// [`MessageCollector::collect`] polls the bus until enough messages arrived or its timeout
/// elapsed. Messages received beyond the requested count are kept for the next call on the same
/// topic, nothing is ever dropped.
#[derive(Debug)]
pub struct MessageCollector<B, C = TokioClock> {
    bus: B,
    clock: C,
    poll_interval: Duration,
    topics: HashMap<String, TopicState>,
}

impl<B> MessageCollector<B>
where
    B: MessageBus,
{
    /// Creates a collector polling `bus` with the default interval.
    pub fn new(bus: B) -> Self {
        Self::with_clock(bus, TokioClock)
    }
}

impl<B, C> MessageCollector<B, C>
where
    B: MessageBus,
    C: Clock,
{
    /// Creates a collector whose waits go through `clock`.
    pub fn with_clock(bus: B, clock: C) -> Self {
        Self {
            bus,
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
            topics: HashMap::new(),
        }
    }

    /// Sets the pause between two polls of the bus.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Starts observing `topic`. Observing a topic twice has no effect.
    pub async fn observe(&mut self, topic: &str) -> OracleResult<()> {
        if self.topics.contains_key(topic) {
            return Ok(());
        }

        self.bus.subscribe(topic).await?;
        self.topics.insert(topic.to_string(), TopicState::default());
        info!(topic, "observing topic");

        Ok(())
    }

    /// Returns the number of received messages of `topic` not yet returned by a collect.
    pub fn pending(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|state| state.backlog.len())
            .unwrap_or(0)
    }

    /// Returns exactly `count` messages of `topic`, in arrival order.
    ///
    /// Starts observing `topic` if it is not observed yet. Fails with [`ErrorKind::Timeout`] if
    /// fewer than `count` messages arrived within `timeout`; the messages received so far are kept
    /// for the next call. Bus errors are returned immediately.
    pub async fn collect(
        &mut self,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> OracleResult<Vec<Message>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        self.observe(topic).await?;

        let deadline = deadline_after(self.clock.now(), timeout);
        loop {
            if let Some(messages) = self.take(topic, count) {
                debug!(topic, count, "collected messages");
                return Ok(messages);
            }

            let batch = self.bus.poll(topic).await?;
            let received = self.append(topic, batch);
            if received >= count {
                continue;
            }

            let now = self.clock.now();
            if now >= deadline {
                bail!(
                    ErrorKind::Timeout,
                    "Expected messages did not arrive in time",
                    format!(
                        "received {received}/{count} messages on topic '{topic}' within {timeout:?}"
                    )
                );
            }

            debug!(topic, received, expected = count, "waiting for more messages");
            self.clock
                .sleep(self.poll_interval.min(deadline - now))
                .await;
        }
    }

    /// Consumes the collector and returns its bus.
    pub fn into_bus(self) -> B {
        self.bus
    }

    fn take(&mut self, topic: &str, count: usize) -> Option<Vec<Message>> {
        let state = self.topics.get_mut(topic)?;
        if state.backlog.len() < count {
            return None;
        }

        Some(state.backlog.drain(..count).collect())
    }

    /// Appends a polled batch to the backlog of `topic`, returning the backlog length.
    fn append(&mut self, topic: &str, batch: Vec<Message>) -> usize {
        let state = self.topics.entry(topic.to_string()).or_default();
        for mut message in batch {
            message.index = state.next_index;
            state.next_index += 1;
            state.backlog.push_back(message);
        }

        state.backlog.len()
    }
}
