//! In-process publish/subscribe keyed by table name.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::source::{
    EventSource, InboundEvent, SubscribeRequest, Subscription, SubscriptionHandle,
};
use crate::errors::SubscriptionError;

struct Subscriber {
    id: u64,
    request: SubscribeRequest,
    tx: mpsc::UnboundedSender<InboundEvent>,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    tables: DashMap<String, Vec<Subscriber>>,
}

/// Fan-out of change events to table subscribers.
///
/// Delivery is at-most-once and never blocks the publisher. A subscriber is
/// removed when its handle is released, or lazily on the next publish once
/// its receiver is gone.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every matching subscriber; returns how many got it.
    pub fn publish(&self, event: InboundEvent) -> usize {
        let Some(mut subscribers) = self.inner.tables.get_mut(&event.table) else {
            return 0;
        };
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter().filter(|s| s.request.accepts(&event)) {
            if subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        log::trace!(
            "Published {:?} on '{}' to {} subscriber(s)",
            event.kind,
            event.table,
            delivered
        );
        delivered
    }

    pub fn subscriber_count(&self, table: &str) -> usize {
        self.inner
            .tables
            .get(table)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn release(inner: &Weak<HubInner>, table: &str, id: u64) {
        if let Some(inner) = inner.upgrade() {
            if let Some(mut subscribers) = inner.tables.get_mut(table) {
                subscribers.retain(|s| s.id != id);
            }
        }
    }
}

impl EventSource for RealtimeHub {
    fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, SubscriptionError> {
        if request.table.is_empty() {
            return Err(SubscriptionError::Rejected {
                channel: request.channel,
                reason: "table name is empty".to_string(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let table = request.table.clone();
        let channel = request.channel.clone();

        self.inner
            .tables
            .entry(table.clone())
            .or_default()
            .push(Subscriber { id, request, tx });
        log::debug!("Subscribed channel '{}' to table '{}'", channel, table);

        let weak = Arc::downgrade(&self.inner);
        let handle = SubscriptionHandle::new(channel, move || {
            RealtimeHub::release(&weak, &table, id);
        });
        Ok(Subscription::new(rx, handle))
    }
}
