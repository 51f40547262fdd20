//! In-process event bus.
//!
//! One bounded publish queue per event kind, drained by its own fan-out task.
//! Fan-out never waits on a subscriber: a full subscriber buffer loses that
//! event for that subscriber only, and the loss is counted.

mod event_bus;

pub use event_bus::*;
