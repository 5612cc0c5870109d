//! Live feed: the owning view of a bounded event list.
//!
//! A feed subscribes first, then fetches its snapshot, then merges every
//! event that arrived in between through the same idempotent merge. Each
//! mount gets a generation number; anything tagged with an older generation
//! (a late snapshot, a stale event) is discarded instead of applied.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::bounded_list::{BoundedEventList, MergeOutcome};
use super::polling::PollingEventSource;
use super::record::LiveRecord;
use super::source::{
    EventSource, InboundEvent, SnapshotQuery, SnapshotSource, SubscribeRequest,
    SubscriptionHandle,
};
use crate::errors::SnapshotFetchError;

/// Default period of the polling source.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPhase {
    #[default]
    Unmounted,
    Mounting,
    Subscribed,
    Unmounting,
}

/// What a view should render besides the items.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedStatus {
    #[default]
    Idle,
    Loading,
    /// Snapshot loaded, push updates flowing.
    Live,
    /// Snapshot loaded, push unavailable, polling instead.
    Polling,
    /// Snapshot loaded, no live updates.
    Degraded { reason: String },
    /// Snapshot failed. Distinct from an empty but healthy feed.
    Failed { reason: String },
}

impl FeedStatus {
    pub fn needs_recovery(&self) -> bool {
        matches!(self, FeedStatus::Degraded { .. } | FeedStatus::Failed { .. })
    }
}

/// When the polling source is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    Disabled,
    /// Only when the push subscription cannot be established.
    #[default]
    Fallback,
    /// Alongside push; both feed the same merge.
    Always,
}

impl FromStr for PollMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(PollMode::Disabled),
            "fallback" => Ok(PollMode::Fallback),
            "always" => Ok(PollMode::Always),
            other => Err(format!("unknown poll mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub channel: String,
    pub query: SnapshotQuery,
    pub capacity: usize,
    pub poll_mode: PollMode,
    pub poll_interval: Duration,
}

impl FeedOptions {
    /// The snapshot is limited to `capacity` rows.
    pub fn new(channel: impl Into<String>, table: impl Into<String>, capacity: usize) -> Self {
        Self {
            channel: channel.into(),
            query: SnapshotQuery::new(table).with_limit(capacity),
            capacity,
            poll_mode: PollMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query = self.query.with_filter(field, value);
        self
    }

    pub fn with_polling(mut self, mode: PollMode, interval: Duration) -> Self {
        self.poll_mode = mode;
        self.poll_interval = interval;
        self
    }
}

/// Counters for what happened to inbound rows since the last mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDiagnostics {
    pub accepted: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub malformed: u64,
    pub last_rejection: Option<String>,
}

/// Renderable copy of a feed's state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedView<T> {
    pub channel: String,
    pub phase: FeedPhase,
    pub status: FeedStatus,
    pub capacity: usize,
    pub items: Vec<T>,
    pub diagnostics: FeedDiagnostics,
    pub mounted_at: Option<DateTime<Utc>>,
}

impl<T: LiveRecord> FeedView<T> {
    /// Items oldest-first by event time; rows without a timestamp lead.
    pub fn chronological(&self) -> Vec<T> {
        let mut items = self.items.clone();
        items.reverse();
        items.sort_by_key(|item| item.occurred_at());
        items
    }
}

struct FeedState<T: LiveRecord> {
    generation: u64,
    phase: FeedPhase,
    status: FeedStatus,
    list: BoundedEventList<T>,
    diagnostics: FeedDiagnostics,
    mounted_at: Option<DateTime<Utc>>,
}

impl<T: LiveRecord> FeedState<T> {
    fn reject(&mut self, channel: &str, err: impl ToString) {
        let reason = err.to_string();
        log::debug!("Skipping malformed row on '{}': {}", channel, reason);
        self.diagnostics.malformed += 1;
        self.diagnostics.last_rejection = Some(reason);
    }
}

struct FeedShared<T: LiveRecord> {
    channel: String,
    state: Mutex<FeedState<T>>,
    version: watch::Sender<u64>,
}

impl<T: LiveRecord> FeedShared<T> {
    fn lock(&self) -> MutexGuard<'_, FeedState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn update<R>(&self, f: impl FnOnce(&mut FeedState<T>) -> R) -> R {
        let result = {
            let mut state = self.lock();
            f(&mut state)
        };
        self.notify();
        result
    }

    /// Returns false when the generation is stale.
    fn apply_snapshot(
        &self,
        generation: u64,
        result: Result<Vec<Value>, SnapshotFetchError>,
        live_status: FeedStatus,
    ) -> bool {
        {
            let mut state = self.lock();
            if state.generation != generation {
                return false;
            }
            match result {
                Ok(rows) => {
                    let mut records = Vec::with_capacity(rows.len());
                    for row in &rows {
                        match T::from_payload(row) {
                            Ok(record) => records.push(record),
                            Err(err) => state.reject(&self.channel, err),
                        }
                    }
                    let capacity = state.list.capacity();
                    state.list = BoundedEventList::initialize(records, capacity);
                    let loaded = state.list.len();
                    state.diagnostics.accepted += loaded as u64;
                    state.status = live_status;
                    log::info!(
                        "Feed '{}' loaded {} row(s) from snapshot",
                        self.channel,
                        loaded
                    );
                }
                Err(err) => {
                    log::warn!("Feed '{}' snapshot failed: {}", self.channel, err);
                    state.status = FeedStatus::Failed {
                        reason: err.to_string(),
                    };
                }
            }
            state.phase = FeedPhase::Subscribed;
        }
        self.notify();
        true
    }

    /// Returns false when the generation is stale.
    fn merge_event(&self, generation: u64, event: &InboundEvent) -> bool {
        let changed = {
            let mut state = self.lock();
            if state.generation != generation {
                return false;
            }
            match T::from_payload(&event.payload) {
                Ok(record) => match state.list.merge(record) {
                    MergeOutcome::Inserted { evicted } => {
                        state.diagnostics.accepted += 1;
                        state.diagnostics.evicted += evicted as u64;
                        true
                    }
                    MergeOutcome::Duplicate => {
                        state.diagnostics.duplicates += 1;
                        false
                    }
                },
                Err(err) => {
                    state.reject(&self.channel, err);
                    true
                }
            }
        };
        if changed {
            self.notify();
        }
        true
    }

    fn live_updates_ended(&self, generation: u64) {
        self.update(|state| {
            if state.generation == generation && !matches!(state.status, FeedStatus::Failed { .. })
            {
                log::warn!("Feed '{}' lost its live sources", self.channel);
                state.status = FeedStatus::Degraded {
                    reason: "live updates ended".to_string(),
                };
            }
        });
    }
}

#[derive(Default)]
struct Lifecycle {
    handles: Vec<SubscriptionHandle>,
    driver: Option<JoinHandle<()>>,
}

/// A live, bounded, newest-first view of one table.
pub struct LiveFeed<T: LiveRecord> {
    options: FeedOptions,
    snapshot: Arc<dyn SnapshotSource>,
    events: Arc<dyn EventSource>,
    shared: Arc<FeedShared<T>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T: LiveRecord> LiveFeed<T> {
    pub fn new(
        options: FeedOptions,
        snapshot: Arc<dyn SnapshotSource>,
        events: Arc<dyn EventSource>,
    ) -> Self {
        let (version, _) = watch::channel(0);
        let shared = Arc::new(FeedShared {
            channel: options.channel.clone(),
            state: Mutex::new(FeedState {
                generation: 0,
                phase: FeedPhase::Unmounted,
                status: FeedStatus::Idle,
                list: BoundedEventList::new(options.capacity),
                diagnostics: FeedDiagnostics::default(),
                mounted_at: None,
            }),
            version,
        });
        Self {
            options,
            snapshot,
            events,
            shared,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn options(&self) -> &FeedOptions {
        &self.options
    }

    pub fn phase(&self) -> FeedPhase {
        self.shared.lock().phase
    }

    pub fn status(&self) -> FeedStatus {
        self.shared.lock().status.clone()
    }

    pub fn view(&self) -> FeedView<T> {
        let state = self.shared.lock();
        FeedView {
            channel: self.options.channel.clone(),
            phase: state.phase,
            status: state.status.clone(),
            capacity: state.list.capacity(),
            items: state.list.to_vec(),
            diagnostics: state.diagnostics.clone(),
            mounted_at: state.mounted_at,
        }
    }

    /// Version counter bumped on every visible state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    /// Mounts the feed, tearing down any previous mount first. Resolves when
    /// the snapshot settles or the mount is superseded.
    pub async fn mount(&self) -> FeedStatus {
        let generation = self.start_mount();
        self.settled(generation).await
    }

    /// Releases the subscriptions and frees the items. Idempotent.
    pub fn unmount(&self) {
        let mut lifecycle = self.lock_lifecycle();
        let was_mounted = self.shared.update(|state| {
            if state.phase == FeedPhase::Unmounted {
                return false;
            }
            state.generation += 1;
            state.phase = FeedPhase::Unmounting;
            true
        });
        if !was_mounted {
            return;
        }

        release(&mut lifecycle);
        self.shared.update(|state| {
            state.phase = FeedPhase::Unmounted;
            state.status = FeedStatus::Idle;
            state.list.clear();
            state.mounted_at = None;
        });
        log::info!("Feed '{}' unmounted", self.options.channel);
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_mount(&self) -> u64 {
        let mut lifecycle = self.lock_lifecycle();
        release(&mut lifecycle);

        let capacity = self.options.capacity;
        let generation = self.shared.update(|state| {
            state.generation += 1;
            state.phase = FeedPhase::Mounting;
            state.status = FeedStatus::Loading;
            state.list = BoundedEventList::new(capacity);
            state.diagnostics = FeedDiagnostics::default();
            state.mounted_at = Some(Utc::now());
            state.generation
        });

        let request = SubscribeRequest::inserts(&self.options.channel, &self.options.query.table)
            .with_row_filters(self.options.query.filters.clone());
        let mut receivers = Vec::new();

        let push_error = match self.events.subscribe(request.clone()) {
            Ok(subscription) => {
                let (rx, handle) = subscription.into_parts();
                receivers.push(rx);
                lifecycle.handles.push(handle);
                None
            }
            Err(err) => {
                log::warn!(
                    "Feed '{}' could not subscribe: {}",
                    self.options.channel,
                    err
                );
                Some(err)
            }
        };

        let want_polling = match self.options.poll_mode {
            PollMode::Disabled => false,
            PollMode::Fallback => push_error.is_some(),
            PollMode::Always => true,
        };
        let mut polling = false;
        if want_polling {
            let poller =
                PollingEventSource::new(self.snapshot.clone(), self.options.poll_interval)
                    .with_limit(capacity);
            match poller.subscribe(request) {
                Ok(subscription) => {
                    let (rx, handle) = subscription.into_parts();
                    receivers.push(rx);
                    lifecycle.handles.push(handle);
                    polling = true;
                }
                Err(err) => {
                    log::warn!("Feed '{}' could not poll: {}", self.options.channel, err);
                }
            }
        }

        let live_status = match (&push_error, polling) {
            (None, _) => FeedStatus::Live,
            (Some(_), true) => FeedStatus::Polling,
            (Some(err), false) => FeedStatus::Degraded {
                reason: err.to_string(),
            },
        };

        lifecycle.driver = Some(tokio::spawn(drive(
            self.shared.clone(),
            generation,
            self.snapshot.clone(),
            self.options.query.clone(),
            receivers,
            live_status,
        )));
        log::debug!(
            "Feed '{}' mounting (generation {})",
            self.options.channel,
            generation
        );
        generation
    }

    async fn settled(&self, generation: u64) -> FeedStatus {
        let mut changes = self.shared.version.subscribe();
        loop {
            let settled = {
                let state = self.shared.lock();
                (state.generation != generation || state.phase != FeedPhase::Mounting)
                    .then(|| state.status.clone())
            };
            if let Some(status) = settled {
                return status;
            }
            if changes.changed().await.is_err() {
                return self.status();
            }
        }
    }
}

impl<T: LiveRecord> Drop for LiveFeed<T> {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn release(lifecycle: &mut Lifecycle) {
    for handle in lifecycle.handles.drain(..) {
        handle.unsubscribe();
    }
    if let Some(driver) = lifecycle.driver.take() {
        driver.abort();
    }
}

async fn drive<T: LiveRecord>(
    shared: Arc<FeedShared<T>>,
    generation: u64,
    snapshot: Arc<dyn SnapshotSource>,
    query: SnapshotQuery,
    receivers: Vec<mpsc::UnboundedReceiver<InboundEvent>>,
    live_status: FeedStatus,
) {
    let result = snapshot.fetch(&query).await;
    if !shared.apply_snapshot(generation, result, live_status) {
        return;
    }
    if receivers.is_empty() {
        return;
    }

    // Events buffered during the fetch are drained here, after the snapshot.
    let mut events = stream::select_all(
        receivers
            .into_iter()
            .map(|mut rx| stream::poll_fn(move |cx| rx.poll_recv(cx))),
    );
    while let Some(event) = events.next().await {
        if !shared.merge_event(generation, &event) {
            return;
        }
    }
    shared.live_updates_ended(generation);
}

/// Type-erased access to a feed, for hosts that keep feeds of several
/// record types side by side.
#[async_trait]
pub trait FeedHandle: Send + Sync {
    fn channel(&self) -> &str;
    fn table(&self) -> &str;
    fn phase(&self) -> FeedPhase;
    fn status(&self) -> FeedStatus;
    fn changes(&self) -> watch::Receiver<u64>;
    fn view_json(&self) -> serde_json::Result<Value>;
    async fn mount(&self) -> FeedStatus;
    fn unmount(&self);
}

#[async_trait]
impl<T: LiveRecord + Serialize> FeedHandle for LiveFeed<T> {
    fn channel(&self) -> &str {
        &self.options.channel
    }

    fn table(&self) -> &str {
        &self.options.query.table
    }

    fn phase(&self) -> FeedPhase {
        LiveFeed::phase(self)
    }

    fn status(&self) -> FeedStatus {
        LiveFeed::status(self)
    }

    fn changes(&self) -> watch::Receiver<u64> {
        LiveFeed::changes(self)
    }

    fn view_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self.view())
    }

    async fn mount(&self) -> FeedStatus {
        LiveFeed::mount(self).await
    }

    fn unmount(&self) {
        LiveFeed::unmount(self)
    }
}
