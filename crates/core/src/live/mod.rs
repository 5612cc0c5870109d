//! Realtime list merging for live feeds.
//!
//! A live feed keeps a bounded, de-duplicated, newest-first list of recent
//! rows, seeded from a snapshot fetch and fed by change events. Sources are
//! injected: the in-process [`RealtimeHub`], a [`PollingEventSource`], or
//! anything else implementing [`EventSource`] / [`SnapshotSource`].

mod bounded_list;
mod feed;
mod hub;
mod payload;
mod polling;
mod record;
mod source;

pub use bounded_list::{BoundedEventList, MergeOutcome};
pub use feed::{
    FeedDiagnostics, FeedHandle, FeedOptions, FeedPhase, FeedStatus, FeedView, LiveFeed,
    PollMode, DEFAULT_POLL_INTERVAL,
};
pub use hub::RealtimeHub;
pub use payload::{matches_filters, Payload};
pub use polling::PollingEventSource;
pub use record::LiveRecord;
pub use source::{
    ChangeKind, EventFilter, EventSource, InboundEvent, SnapshotQuery, SnapshotSource,
    SubscribeRequest, Subscription, SubscriptionHandle,
};
