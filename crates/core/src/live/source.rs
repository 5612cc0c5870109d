//! Collaborator seams: snapshot fetch and event subscription.
//!
//! Both are injected as trait objects so a feed can run against the realtime
//! hub, a polling adapter, or a test fake.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::payload::matches_filters;
use crate::errors::{SnapshotFetchError, SubscriptionError};

/// Parameters of a one-time bulk read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    pub table: String,
    /// Top-level field equality filters (e.g. `tenantId`).
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    pub limit: Option<usize>,
}

impl SnapshotQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        matches_filters(row, &self.filters)
    }
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Rows newest-first.
    async fn fetch(&self, query: &SnapshotQuery) -> Result<Vec<Value>, SnapshotFetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFilter {
    All,
    #[default]
    Inserts,
    Updates,
    Deletes,
}

impl EventFilter {
    pub fn accepts(self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventFilter::All, _)
                | (EventFilter::Inserts, ChangeKind::Insert)
                | (EventFilter::Updates, ChangeKind::Update)
                | (EventFilter::Deletes, ChangeKind::Delete)
        )
    }
}

/// A change notification as delivered by a source. The payload is untyped
/// until a feed ingests it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub payload: Value,
}

impl InboundEvent {
    pub fn insert(table: impl Into<String>, payload: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    pub channel: String,
    pub table: String,
    pub filter: EventFilter,
    /// Row-level equality filters, same semantics as [`SnapshotQuery::filters`].
    pub row_filters: BTreeMap<String, Value>,
}

impl SubscribeRequest {
    pub fn inserts(channel: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            table: table.into(),
            filter: EventFilter::Inserts,
            row_filters: BTreeMap::new(),
        }
    }

    pub fn with_row_filters(mut self, filters: BTreeMap<String, Value>) -> Self {
        self.row_filters = filters;
        self
    }

    pub fn accepts(&self, event: &InboundEvent) -> bool {
        event.table == self.table
            && self.filter.accepts(event.kind)
            && matches_filters(&event.payload, &self.row_filters)
    }
}

pub trait EventSource: Send + Sync {
    /// Registers a subscription. Events flow into the returned receiver
    /// until the handle is released.
    fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, SubscriptionError>;
}

/// An established subscription: the event stream plus its release handle.
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<InboundEvent>,
    pub handle: SubscriptionHandle,
}

impl Subscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<InboundEvent>,
        handle: SubscriptionHandle,
    ) -> Self {
        Self { events, handle }
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<InboundEvent>, SubscriptionHandle) {
        (self.events, self.handle)
    }
}

/// Owns the release of a subscription. Releasing happens exactly once,
/// either through [`SubscriptionHandle::unsubscribe`] or on drop.
pub struct SubscriptionHandle {
    channel: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(channel: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            channel: channel.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            log::debug!("Releasing subscription on channel '{}'", self.channel);
            release();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .field("active", &self.release.is_some())
            .finish()
    }
}
