//! Mounted live feeds, keyed by kind and optional tenant.
//!
//! Feeds are created on first access and dropped from the registry when they
//! are unmounted. Tenant-scoped feeds are capped. Lifecycle transitions are
//! published on the [`EventBus`] for SSE clients.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use bizdesk_core::feeds::FeedKind;
use bizdesk_core::live::{
    EventSource, FeedHandle, FeedPhase, FeedStatus, PollMode, SnapshotSource,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::events::{
    EventBus, ServerEvent, FEED_DEGRADED, FEED_FAILED, FEED_MOUNTED, FEED_UNMOUNTED,
};

/// Default cap on concurrently registered tenant-scoped feeds.
pub const DEFAULT_MAX_TENANT_FEEDS: usize = 256;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tenant feed limit of {limit} reached")]
    TenantLimit { limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedKey {
    pub kind: FeedKind,
    pub tenant_id: Option<String>,
}

impl FeedKey {
    pub fn new(kind: FeedKind, tenant_id: Option<String>) -> Self {
        Self { kind, tenant_id }
    }
}

/// One row of the `/feeds` listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSummary {
    pub kind: FeedKind,
    pub tenant_id: Option<String>,
    pub channel: String,
    pub table: String,
    pub phase: FeedPhase,
    pub status: FeedStatus,
}

pub struct FeedRegistry {
    snapshot: Arc<dyn SnapshotSource>,
    events: Arc<dyn EventSource>,
    poll_mode: PollMode,
    poll_interval: Duration,
    event_bus: EventBus,
    max_tenant_feeds: usize,
    feeds: RwLock<HashMap<FeedKey, Arc<dyn FeedHandle>>>,
}

impl FeedRegistry {
    pub fn new(
        snapshot: Arc<dyn SnapshotSource>,
        events: Arc<dyn EventSource>,
        poll_mode: PollMode,
        poll_interval: Duration,
        event_bus: EventBus,
    ) -> Self {
        Self {
            snapshot,
            events,
            poll_mode,
            poll_interval,
            event_bus,
            max_tenant_feeds: DEFAULT_MAX_TENANT_FEEDS,
            feeds: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_tenant_limit(mut self, limit: usize) -> Self {
        self.max_tenant_feeds = limit;
        self
    }

    pub fn get(&self, key: &FeedKey) -> Option<Arc<dyn FeedHandle>> {
        self.feeds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Returns the feed for `key`, creating it (unmounted) if needed. The
    /// flag is true when this call created it.
    pub fn get_or_create(
        &self,
        key: &FeedKey,
    ) -> Result<(Arc<dyn FeedHandle>, bool), RegistryError> {
        if let Some(feed) = self.get(key) {
            return Ok((feed, false));
        }
        let mut feeds = self.feeds.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(feed) = feeds.get(key) {
            return Ok((feed.clone(), false));
        }
        if key.tenant_id.is_some() {
            let tenant_feeds = feeds.keys().filter(|k| k.tenant_id.is_some()).count();
            if tenant_feeds >= self.max_tenant_feeds {
                tracing::warn!(
                    "Refusing feed {:?} for tenant {:?}: {} tenant feeds registered",
                    key.kind,
                    key.tenant_id,
                    tenant_feeds
                );
                return Err(RegistryError::TenantLimit {
                    limit: self.max_tenant_feeds,
                });
            }
        }

        let feed = key.kind.build(
            key.tenant_id.as_deref(),
            self.poll_mode,
            self.poll_interval,
            self.snapshot.clone(),
            self.events.clone(),
        );
        feeds.insert(key.clone(), feed.clone());
        drop(feeds);

        tracing::info!("Created feed '{}'", feed.channel());
        self.watch_for_degradation(key.clone(), &feed);
        Ok((feed, true))
    }

    /// Mounts the feed if this is its first access. Concurrent first callers
    /// wait for the same mount to settle.
    pub async fn ensure_mounted(
        &self,
        key: &FeedKey,
    ) -> Result<Arc<dyn FeedHandle>, RegistryError> {
        let (feed, created) = self.get_or_create(key)?;
        if created {
            self.mount_feed(key, &feed).await;
        } else {
            self.wait_until_subscribed(key, &feed).await;
        }
        Ok(feed)
    }

    /// (Re)mounts the feed and publishes the outcome.
    pub async fn mount(&self, key: &FeedKey) -> Result<Arc<dyn FeedHandle>, RegistryError> {
        let (feed, _) = self.get_or_create(key)?;
        self.mount_feed(key, &feed).await;
        Ok(feed)
    }

    /// Unmounts a feed and drops it from the registry. Returns the feed, or
    /// `None` when there is no such feed.
    pub fn unmount(&self, key: &FeedKey) -> Option<Arc<dyn FeedHandle>> {
        let feed = self
            .feeds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)?;

        let was_mounted = feed.phase() != FeedPhase::Unmounted;
        feed.unmount();
        if was_mounted {
            tracing::info!("Unmounted feed '{}'", feed.channel());
            self.publish(FEED_UNMOUNTED, key, &feed);
        }
        Some(feed)
    }

    pub fn list(&self) -> Vec<FeedSummary> {
        let mut summaries: Vec<FeedSummary> = self
            .feeds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, feed)| FeedSummary {
                kind: key.kind,
                tenant_id: key.tenant_id.clone(),
                channel: feed.channel().to_string(),
                table: feed.table().to_string(),
                phase: feed.phase(),
                status: feed.status(),
            })
            .collect();
        summaries.sort_by(|a, b| (a.kind, &a.tenant_id).cmp(&(b.kind, &b.tenant_id)));
        summaries
    }

    /// Remounts every feed that is degraded or failed. Returns how many.
    pub async fn recover(&self) -> usize {
        let stale: Vec<(FeedKey, Arc<dyn FeedHandle>)> = self
            .feeds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, feed)| feed.status().needs_recovery())
            .map(|(key, feed)| (key.clone(), feed.clone()))
            .collect();

        for (key, feed) in &stale {
            tracing::info!("Remounting feed '{}' ({:?})", feed.channel(), feed.status());
            self.mount_feed(key, feed).await;
        }
        stale.len()
    }

    /// Unmounts and drops everything; used on shutdown.
    pub fn unmount_all(&self) {
        let feeds: Vec<Arc<dyn FeedHandle>> = self
            .feeds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, feed)| feed)
            .collect();
        for feed in feeds {
            feed.unmount();
        }
    }

    async fn mount_feed(&self, key: &FeedKey, feed: &Arc<dyn FeedHandle>) {
        let status = feed.mount().await;
        match &status {
            FeedStatus::Live | FeedStatus::Polling => {
                tracing::info!("Feed '{}' mounted ({:?})", feed.channel(), status);
                self.publish(FEED_MOUNTED, key, feed);
            }
            FeedStatus::Degraded { reason } => {
                tracing::warn!("Feed '{}' degraded: {}", feed.channel(), reason);
                self.publish(FEED_DEGRADED, key, feed);
            }
            FeedStatus::Failed { reason } => {
                tracing::warn!("Feed '{}' failed: {}", feed.channel(), reason);
                self.publish(FEED_FAILED, key, feed);
            }
            // Superseded by a newer mount or an unmount.
            FeedStatus::Idle | FeedStatus::Loading => {}
        }
    }

    /// Waits for another caller's mount of `feed` to settle. Gives up once
    /// the feed leaves the registry.
    async fn wait_until_subscribed(&self, key: &FeedKey, feed: &Arc<dyn FeedHandle>) {
        let mut changes = feed.changes();
        while feed.phase() != FeedPhase::Subscribed && self.holds(key, feed) {
            if changes.changed().await.is_err() {
                break;
            }
        }
    }

    fn holds(&self, key: &FeedKey, feed: &Arc<dyn FeedHandle>) -> bool {
        self.get(key)
            .is_some_and(|current| Arc::ptr_eq(&current, feed))
    }

    /// Publishes `feed:degraded` when a running feed loses its live sources.
    fn watch_for_degradation(&self, key: FeedKey, feed: &Arc<dyn FeedHandle>) {
        let mut changes = feed.changes();
        let weak: Weak<dyn FeedHandle> = Arc::downgrade(feed);
        let event_bus = self.event_bus.clone();

        tokio::spawn(async move {
            let mut last = FeedStatus::Idle;
            while changes.changed().await.is_ok() {
                let Some(feed) = weak.upgrade() else {
                    break;
                };
                let status = feed.status();
                let was_running = matches!(last, FeedStatus::Live | FeedStatus::Polling);
                if was_running && matches!(status, FeedStatus::Degraded { .. }) {
                    tracing::warn!("Feed '{}' lost its live updates", feed.channel());
                    event_bus.publish(lifecycle_event(FEED_DEGRADED, &key, &feed));
                }
                last = status;
            }
        });
    }

    fn publish(&self, name: &'static str, key: &FeedKey, feed: &Arc<dyn FeedHandle>) {
        self.event_bus.publish(lifecycle_event(name, key, feed));
    }
}

fn lifecycle_event(name: &'static str, key: &FeedKey, feed: &Arc<dyn FeedHandle>) -> ServerEvent {
    ServerEvent::with_payload(
        name,
        json!({
            "kind": key.kind,
            "tenantId": key.tenant_id,
            "channel": feed.channel(),
            "status": feed.status(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizdesk_core::errors::{SnapshotFetchError, SubscriptionError};
    use bizdesk_core::live::{
        InboundEvent, RealtimeHub, SnapshotQuery, SubscribeRequest, Subscription,
        SubscriptionHandle,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::{broadcast, mpsc, oneshot};

    struct FlakySnapshot {
        failing: AtomicBool,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl FlakySnapshot {
        /// The next fetch blocks until the returned sender fires.
        fn hold_next_fetch(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.gate.lock().unwrap() = Some(rx);
            tx
        }
    }

    #[async_trait::async_trait]
    impl SnapshotSource for FlakySnapshot {
        async fn fetch(&self, query: &SnapshotQuery) -> Result<Vec<Value>, SnapshotFetchError> {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.failing.load(Ordering::SeqCst) {
                Err(SnapshotFetchError::new(query.table.clone(), "database is locked"))
            } else {
                Ok(vec![json!({"id": "s1", "amount": 3, "tenantId": "acme"})])
            }
        }
    }

    /// Push source whose open subscriptions can be cut from the outside.
    #[derive(Default)]
    struct CuttableEvents {
        senders: Mutex<Vec<mpsc::UnboundedSender<InboundEvent>>>,
    }

    impl CuttableEvents {
        fn cut(&self) {
            self.senders.lock().unwrap().clear();
        }
    }

    impl EventSource for CuttableEvents {
        fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, SubscriptionError> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().push(tx);
            Ok(Subscription::new(
                rx,
                SubscriptionHandle::new(request.channel, || {}),
            ))
        }
    }

    fn snapshot(failing: bool) -> Arc<FlakySnapshot> {
        Arc::new(FlakySnapshot {
            failing: AtomicBool::new(failing),
            gate: Mutex::new(None),
        })
    }

    fn registry(failing: bool) -> (Arc<FlakySnapshot>, RealtimeHub, EventBus, FeedRegistry) {
        let snapshot = snapshot(failing);
        let hub = RealtimeHub::new();
        let bus = EventBus::new(16);
        let registry = FeedRegistry::new(
            snapshot.clone(),
            Arc::new(hub.clone()),
            PollMode::Disabled,
            Duration::from_secs(5),
            bus.clone(),
        );
        (snapshot, hub, bus, registry)
    }

    fn tenant(kind: FeedKind, tenant: &str) -> FeedKey {
        FeedKey::new(kind, Some(tenant.to_string()))
    }

    async fn next_event(events: &mut broadcast::Receiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for a lifecycle event")
            .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_mounted_mounts_once_and_publishes() {
        let (_snapshot, hub, bus, registry) = registry(false);
        let mut events = bus.subscribe();
        let key = tenant(FeedKind::Sales, "acme");

        let feed = registry.ensure_mounted(&key).await.unwrap();
        assert_eq!(feed.status(), FeedStatus::Live);
        assert_eq!(feed.channel(), "live-sales:acme");
        assert_eq!(next_event(&mut events).await.name, FEED_MOUNTED);

        registry.ensure_mounted(&key).await.unwrap();
        assert_eq!(hub.subscriber_count("sales"), 1);
        assert_eq!(registry.list().len(), 1);

        hub.publish(InboundEvent::insert(
            "sales",
            json!({"id": "s2", "amount": 1, "tenantId": "other"}),
        ));
        assert_eq!(feed.view_json().unwrap()["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unmount_and_recover() {
        let (snapshot, hub, bus, registry) = registry(true);
        let mut events = bus.subscribe();
        let key = FeedKey::new(FeedKind::Sales, None);

        let feed = registry.mount(&key).await.unwrap();
        assert!(matches!(feed.status(), FeedStatus::Failed { .. }));
        assert_eq!(next_event(&mut events).await.name, FEED_FAILED);

        snapshot.failing.store(false, Ordering::SeqCst);
        assert_eq!(registry.recover().await, 1);
        assert_eq!(feed.status(), FeedStatus::Live);
        assert_eq!(registry.recover().await, 0);

        assert!(registry.unmount(&key).is_some());
        assert_eq!(feed.phase(), FeedPhase::Unmounted);
        assert_eq!(hub.subscriber_count("sales"), 0);
        assert!(registry.unmount(&FeedKey::new(FeedKind::Telemetry, None)).is_none());
    }

    #[tokio::test]
    async fn test_unmounted_feeds_leave_the_registry() {
        let (_snapshot, hub, _bus, registry) = registry(false);

        for i in 0..50 {
            let key = tenant(FeedKind::Sales, &format!("t{}", i));
            registry.ensure_mounted(&key).await.unwrap();
            assert_eq!(registry.list().len(), 1);
            assert!(registry.unmount(&key).is_some());
        }

        assert!(registry.list().is_empty());
        assert_eq!(hub.subscriber_count("sales"), 0);
    }

    #[tokio::test]
    async fn test_tenant_feeds_are_capped() {
        let (_snapshot, _hub, _bus, registry) = registry(false);
        let registry = registry.with_tenant_limit(2);

        registry.ensure_mounted(&tenant(FeedKind::Sales, "a")).await.unwrap();
        registry.ensure_mounted(&tenant(FeedKind::Telemetry, "b")).await.unwrap();
        assert!(matches!(
            registry.ensure_mounted(&tenant(FeedKind::Sales, "c")).await,
            Err(RegistryError::TenantLimit { limit: 2 })
        ));

        // Unscoped feeds and existing tenant feeds are unaffected.
        registry.ensure_mounted(&FeedKey::new(FeedKind::Sales, None)).await.unwrap();
        registry.ensure_mounted(&tenant(FeedKind::Sales, "a")).await.unwrap();
        assert_eq!(registry.list().len(), 3);

        registry.unmount(&tenant(FeedKind::Sales, "a"));
        registry.ensure_mounted(&tenant(FeedKind::Sales, "c")).await.unwrap();
        assert_eq!(registry.list().len(), 3);
    }

    #[tokio::test]
    async fn test_unmount_publishes_only_for_mounted_feeds() {
        let (_snapshot, _hub, bus, registry) = registry(false);
        let mut events = bus.subscribe();

        let idle = tenant(FeedKind::Sales, "idle");
        registry.get_or_create(&idle).unwrap();
        assert!(registry.unmount(&idle).is_some());
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        let key = tenant(FeedKind::Sales, "acme");
        registry.ensure_mounted(&key).await.unwrap();
        assert_eq!(next_event(&mut events).await.name, FEED_MOUNTED);
        registry.unmount(&key);
        registry.unmount(&key);
        assert_eq!(next_event(&mut events).await.name, FEED_UNMOUNTED);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_first_access_waits_for_the_same_mount() {
        let (snapshot, hub, _bus, registry) = registry(false);
        let open = snapshot.hold_next_fetch();
        let registry = Arc::new(registry);
        let key = tenant(FeedKind::Sales, "acme");

        let access = |registry: Arc<FeedRegistry>, key: FeedKey| {
            tokio::spawn(async move { registry.ensure_mounted(&key).await.unwrap().status() })
        };

        let first = access(registry.clone(), key.clone());
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.get(&key).map(|f| f.phase()) != Some(FeedPhase::Mounting) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let second = access(registry.clone(), key.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        open.send(()).unwrap();
        assert_eq!(first.await.unwrap(), FeedStatus::Live);
        assert_eq!(second.await.unwrap(), FeedStatus::Live);
        assert_eq!(hub.subscriber_count("sales"), 1);
    }

    #[tokio::test]
    async fn test_losing_live_updates_publishes_degraded() {
        let events = Arc::new(CuttableEvents::default());
        let bus = EventBus::new(16);
        let registry = FeedRegistry::new(
            snapshot(false),
            events.clone(),
            PollMode::Disabled,
            Duration::from_secs(5),
            bus.clone(),
        );
        let mut lifecycle = bus.subscribe();
        let key = FeedKey::new(FeedKind::Sales, None);

        let feed = registry.mount(&key).await.unwrap();
        assert_eq!(feed.status(), FeedStatus::Live);
        assert_eq!(next_event(&mut lifecycle).await.name, FEED_MOUNTED);
        tokio::time::sleep(Duration::from_millis(20)).await;

        events.cut();
        let event = next_event(&mut lifecycle).await;
        assert_eq!(event.name, FEED_DEGRADED);
        let payload = event.payload.unwrap();
        assert_eq!(payload["status"]["state"], "degraded");
        assert_eq!(payload["status"]["reason"], "live updates ended");
        assert!(feed.status().needs_recovery());
    }
}
