//! Web domain event sink implementation.
//!
//! Receives domain events and hands them to a background queue worker.

use std::sync::{Mutex, PoisonError};

use bizdesk_core::events::{DomainEvent, DomainEventSink};
use bizdesk_core::live::RealtimeHub;
use tokio::sync::mpsc;

use super::queue_worker::event_queue_worker;

/// Domain event sink for the web server runtime.
///
/// # Two-Phase Initialization
///
/// The table service needs the sink before the hub consumers exist, so:
///
/// 1. Create the sink with `new()` - this just creates the channel
/// 2. Call `start_worker()` once the hub is ready - this spawns the worker
///
/// Events emitted in between are buffered.
pub struct WebDomainEventSink {
    tx: mpsc::UnboundedSender<DomainEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<DomainEvent>>>,
}

impl WebDomainEventSink {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Starts the background worker. Later calls are ignored.
    pub fn start_worker(&self, hub: RealtimeHub) {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match rx {
            Some(rx) => {
                tokio::spawn(event_queue_worker(rx, hub));
            }
            None => tracing::warn!("Domain event worker already started"),
        }
    }
}

impl Default for WebDomainEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainEventSink for WebDomainEventSink {
    fn emit(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Domain event worker is gone; dropping event");
        }
    }
}
