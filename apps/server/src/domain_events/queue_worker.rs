//! Event queue worker for processing domain events.
//!
//! Receives events from an mpsc channel and publishes each inserted row on
//! the realtime hub. Whatever is already queued is drained as one batch.

use bizdesk_core::events::DomainEvent;
use bizdesk_core::live::{InboundEvent, RealtimeHub};
use tokio::sync::mpsc;

/// Upper bound on events handled per wake-up.
const MAX_BATCH: usize = 256;

/// Runs the event queue worker until every sender is dropped.
pub async fn event_queue_worker(mut rx: mpsc::UnboundedReceiver<DomainEvent>, hub: RealtimeHub) {
    tracing::info!("Domain event queue worker started");

    let mut batch = Vec::with_capacity(MAX_BATCH);
    while rx.recv_many(&mut batch, MAX_BATCH).await > 0 {
        process_event_batch(&mut batch, &hub);
    }

    tracing::info!("Domain event queue worker shutting down");
}

fn process_event_batch(batch: &mut Vec<DomainEvent>, hub: &RealtimeHub) {
    tracing::debug!("Processing batch of {} domain event(s)", batch.len());
    for event in batch.drain(..) {
        match event {
            DomainEvent::RowInserted { table, row } => {
                let delivered = hub.publish(InboundEvent::insert(table.clone(), row));
                tracing::trace!("Row inserted into '{}' reached {} feed(s)", table, delivered);
            }
        }
    }
}
