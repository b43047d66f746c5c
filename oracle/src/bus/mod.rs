//! Access to the message bus the CDC pipeline publishes to.

mod base;
pub mod memory;
pub mod rest_proxy;

pub use base::MessageBus;
