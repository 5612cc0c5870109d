use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use bizdesk_core::{
    feeds::TENANT_FIELD,
    live::SnapshotQuery,
    tables::{TableServiceTrait, MAX_SNAPSHOT_ROWS},
};
use serde::Deserialize;
use serde_json::Value;

use crate::{error::ApiResult, main_lib::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRowsParams {
    limit: Option<usize>,
    tenant_id: Option<String>,
}

async fn list_rows(
    Path(table): Path<String>,
    Query(params): Query<ListRowsParams>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Value>>> {
    let mut query =
        SnapshotQuery::new(table).with_limit(params.limit.unwrap_or(MAX_SNAPSHOT_ROWS));
    if let Some(tenant) = params.tenant_id {
        query = query.with_filter(TENANT_FIELD, tenant);
    }
    let rows = state.table_service.list_rows(&query)?;
    Ok(Json(rows))
}

async fn insert_row(
    Path(table): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let row = state.table_service.insert_row(&table, payload).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/tables/{table}/rows", get(list_rows).post(insert_row))
}
