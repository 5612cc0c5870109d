//! Polling adapter: turns a snapshot source into an event source.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use super::source::{
    EventSource, InboundEvent, SnapshotQuery, SnapshotSource, SubscribeRequest, Subscription,
    SubscriptionHandle,
};
use crate::errors::SubscriptionError;

/// Re-fetches a table on an interval and replays the rows as insert events.
///
/// Every poll re-delivers rows the subscriber has already seen; consumers
/// rely on idempotent merge to ignore them.
pub struct PollingEventSource {
    source: Arc<dyn SnapshotSource>,
    period: Duration,
    limit: Option<usize>,
}

impl PollingEventSource {
    pub fn new(source: Arc<dyn SnapshotSource>, period: Duration) -> Self {
        Self {
            source,
            period,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl EventSource for PollingEventSource {
    fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, SubscriptionError> {
        let runtime = Handle::try_current().map_err(|_| {
            SubscriptionError::Unavailable("polling requires a tokio runtime".to_string())
        })?;
        if self.period.is_zero() {
            return Err(SubscriptionError::Rejected {
                channel: request.channel,
                reason: "poll interval must be positive".to_string(),
            });
        }

        let query = SnapshotQuery {
            table: request.table.clone(),
            filters: request.row_filters.clone(),
            limit: self.limit,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let source = self.source.clone();
        let period = self.period;
        let channel = request.channel.clone();

        let task = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the feed already holds a snapshot.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match source.fetch(&query).await {
                    Ok(rows) => {
                        // Oldest first, so the newest row ends up at the head.
                        for row in rows.into_iter().rev() {
                            let event = InboundEvent::insert(query.table.clone(), row);
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        log::warn!("Poll of '{}' failed: {}", query.table, err);
                        if tx.is_closed() {
                            return;
                        }
                    }
                }
            }
        });

        let handle = SubscriptionHandle::new(channel, move || task.abort());
        Ok(Subscription::new(rx, handle))
    }
}
