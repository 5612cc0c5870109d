use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use bizdesk_core::feeds::FeedKind;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio_stream::{wrappers::WatchStream, StreamExt};

use super::SSE_KEEP_ALIVE;
use crate::{
    error::{ApiError, ApiResult},
    feed_registry::{FeedKey, FeedSummary},
    main_lib::AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedParams {
    tenant_id: Option<String>,
}

fn feed_key(kind: &str, params: FeedParams) -> ApiResult<FeedKey> {
    let kind: FeedKind = kind.parse().map_err(ApiError::NotFound)?;
    let tenant_id = match params.tenant_id {
        Some(tenant) if tenant.trim().is_empty() => {
            return Err(ApiError::BadRequest("tenantId must not be blank".to_string()))
        }
        other => other,
    };
    Ok(FeedKey::new(kind, tenant_id))
}

async fn list_feeds(State(state): State<Arc<AppState>>) -> Json<Vec<FeedSummary>> {
    Json(state.feeds.list())
}

async fn get_feed(
    Path(kind): Path<String>,
    Query(params): Query<FeedParams>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Value>> {
    let key = feed_key(&kind, params)?;
    let feed = state.feeds.ensure_mounted(&key).await?;
    Ok(Json(feed.view_json()?))
}

async fn mount_feed(
    Path(kind): Path<String>,
    Query(params): Query<FeedParams>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Value>> {
    let key = feed_key(&kind, params)?;
    let feed = state.feeds.mount(&key).await?;
    Ok(Json(feed.view_json()?))
}

async fn unmount_feed(
    Path(kind): Path<String>,
    Query(params): Query<FeedParams>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Value>> {
    let key = feed_key(&kind, params)?;
    let feed = state
        .feeds
        .unmount(&key)
        .ok_or_else(|| ApiError::NotFound(format!("feed '{}' does not exist", kind)))?;
    Ok(Json(feed.view_json()?))
}

/// Streams the feed's view every time it changes, starting with the current one.
async fn stream_feed(
    Path(kind): Path<String>,
    Query(params): Query<FeedParams>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let key = feed_key(&kind, params)?;
    let feed = state.feeds.ensure_mounted(&key).await?;

    let changes = WatchStream::new(feed.changes());
    let stream = changes.filter_map(move |_version| match feed.view_json() {
        Ok(view) => match SseEvent::default().event("feed").json_data(view) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                tracing::error!("Failed to encode feed view for {}: {}", feed.channel(), err);
                None
            }
        },
        Err(err) => {
            tracing::error!("Failed to serialize feed view for {}: {}", feed.channel(), err);
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive")))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/feeds", get(list_feeds))
        .route("/feeds/{kind}", get(get_feed))
        .route("/feeds/{kind}/mount", post(mount_feed))
        .route("/feeds/{kind}/unmount", post(unmount_feed))
        .route("/feeds/{kind}/stream", get(stream_feed))
}
