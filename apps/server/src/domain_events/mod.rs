//! Domain events runtime bridge for the web server.
//!
//! Receives domain events via DomainEventSink and forwards inserted rows to
//! the realtime hub, where mounted feeds pick them up.

mod queue_worker;
mod sink;

pub use sink::WebDomainEventSink;
