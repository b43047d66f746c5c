mod base;
mod bus;
mod collector;
mod connection;
mod format;
mod harness;
mod pipeline;
mod registry;
mod service;

pub use base::*;
pub use bus::*;
pub use collector::*;
pub use connection::*;
pub use format::*;
pub use harness::*;
pub use pipeline::*;
pub use registry::*;
pub use service::*;
