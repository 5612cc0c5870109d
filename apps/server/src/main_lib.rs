use std::sync::Arc;

use crate::{
    config::Config, domain_events::WebDomainEventSink, events::EventBus,
    feed_registry::{FeedKey, FeedRegistry},
};
use bizdesk_core::{
    feeds::FeedKind,
    live::{EventSource, RealtimeHub},
    tables::TableService,
};
use bizdesk_storage_sqlite::{db, rows::TableRowRepository};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub struct AppState {
    pub table_service: Arc<TableService>,
    pub feeds: Arc<FeedRegistry>,
    pub event_bus: EventBus,
}

pub fn init_tracing() {
    let log_format = std::env::var("BD_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let db_path = db::init(&config.db_path)?;
    tracing::info!("Database path in use: {}", db_path);

    let pool = db::create_pool(&db_path)?;
    db::run_migrations(&pool)?;
    let writer = db::spawn_writer((*pool).clone());

    // Domain event sink - two-phase initialization: the table service needs
    // the sink, the worker needs the hub.
    let domain_event_sink = Arc::new(WebDomainEventSink::new());

    let row_repository = Arc::new(TableRowRepository::new(pool, writer));
    let table_service = Arc::new(TableService::new(
        row_repository,
        domain_event_sink.clone(),
    ));

    let hub = RealtimeHub::new();
    domain_event_sink.start_worker(hub.clone());
    let events: Arc<dyn EventSource> = Arc::new(hub);

    let event_bus = EventBus::new(256);
    let feeds = Arc::new(FeedRegistry::new(
        table_service.clone(),
        events,
        config.poll_mode,
        config.poll_interval,
        event_bus.clone(),
    )
    .with_tenant_limit(config.max_tenant_feeds));

    for kind in FeedKind::ALL {
        let feed = feeds.mount(&FeedKey::new(kind, None)).await?;
        tracing::info!("Feed '{}' status at startup: {:?}", feed.channel(), feed.status());
    }

    Ok(Arc::new(AppState {
        table_service,
        feeds,
        event_bus,
    }))
}
