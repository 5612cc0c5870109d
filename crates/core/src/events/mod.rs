//! Domain events module.
//!
//! Provides domain event types and the sink trait for emitting events
//! after successful mutations. Runtime adapters implement the sink to
//! forward events to the realtime hub.

mod domain_event;
mod sink;

pub use domain_event::*;
pub use sink::*;
