//! Doubles and helpers for exercising the oracle without external services.

pub mod clock;
pub mod encoding;
pub mod failpoints;
pub mod simulated;

pub use crate::bus::memory::MemoryBus;
pub use crate::decoder::registry::MemorySchemaRegistry;
pub use clock::ManualClock;
pub use simulated::{PipelineFault, SimulatedPipeline};
