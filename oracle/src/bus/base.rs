use std::future::Future;

use crate::error::OracleResult;
use crate::types::Message;

/// Subscription to topics of a message bus and sequential consumption of their messages.
///
/// Implementations consume every subscribed topic from its earliest offset, so messages published
/// before the subscription took effect are still delivered.
pub trait MessageBus {
    /// Subscribes to `topic`. Subscribing twice to the same topic has no effect.
    fn subscribe(&self, topic: &str) -> impl Future<Output = OracleResult<()>> + Send;

    /// Returns the messages published to `topic` since the previous poll, in delivery order.
    ///
    /// An empty result means nothing new is available yet.
    fn poll(&self, topic: &str) -> impl Future<Output = OracleResult<Vec<Message>>> + Send;

    /// Releases the resources held for the subscriptions.
    ///
    /// The default implementation is a no-op.
    fn close(&self) -> impl Future<Output = OracleResult<()>> + Send {
        async { Ok(()) }
    }
}
