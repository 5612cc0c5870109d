//! Where table services send their domain events.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::DomainEvent;

/// Receives a [`DomainEvent`] after each committed mutation.
///
/// `emit` runs on the request path, so it must only hand the event off
/// (queue, channel) and never wait on I/O. Delivery is best-effort: a lost
/// event costs a live feed one row, never the write itself.
pub trait DomainEventSink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}

/// Keeps every emitted event in memory. Used by tests and by hosts that
/// forward events on their own schedule.
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DomainEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.lock().clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl DomainEventSink for RecordingEventSink {
    fn emit(&self, event: DomainEvent) {
        self.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_drains_in_emit_order() {
        let sink = RecordingEventSink::new();
        let shared: Arc<dyn DomainEventSink> = Arc::new(sink.clone());

        shared.emit(DomainEvent::row_inserted("sales", json!({"id": 1})));
        shared.emit(DomainEvent::row_inserted("geo_threats", json!({"id": "g1"})));
        assert_eq!(sink.len(), 2);

        let tables: Vec<String> = sink
            .take()
            .into_iter()
            .map(|DomainEvent::RowInserted { table, .. }| table)
            .collect();
        assert_eq!(tables, vec!["sales", "geo_threats"]);
        assert!(sink.is_empty());
        assert!(sink.take().is_empty());
    }
}
