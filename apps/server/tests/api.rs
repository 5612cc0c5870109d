use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use bizdesk_server::{api::app_router, build_state, config::Config};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

async fn test_app() -> (TempDir, Router) {
    test_app_with(&[]).await
}

async fn test_app_with(vars: &[(&str, &str)]) -> (TempDir, Router) {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("test.db").to_string_lossy().to_string();
    let config = Config::from_lookup(|key| match key {
        "BD_DB_PATH" => Some(db_path.clone()),
        "BD_POLL_MODE" => Some("disabled".to_string()),
        _ => vars
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string()),
    })
    .unwrap();
    let state = build_state(&config).await.unwrap();
    (tmp, app_router(state, &config))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Re-reads a feed view until `check` passes or two seconds elapse.
async fn wait_for_view(app: &Router, uri: &str, check: impl Fn(&Value) -> bool) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let (status, view) = call(app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK);
        if check(&view) || tokio::time::Instant::now() >= deadline {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn item_ids(view: &Value) -> Vec<String> {
    view["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| item["id"].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn healthz_works() {
    let (_tmp, app) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/api/v1/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn default_feeds_are_mounted_at_startup() {
    let (_tmp, app) = test_app().await;
    let (status, feeds) = call(&app, "GET", "/api/v1/feeds", None).await;
    assert_eq!(status, StatusCode::OK);

    let feeds = feeds.as_array().unwrap();
    assert_eq!(feeds.len(), 4);
    assert!(feeds
        .iter()
        .all(|f| f["phase"] == "subscribed" && f["status"]["state"] == "live"));
}

#[tokio::test]
async fn inserted_rows_reach_the_live_feed() {
    let (_tmp, app) = test_app().await;

    for i in 1..=7 {
        let (status, row) = call(
            &app,
            "POST",
            "/api/v1/tables/sales/rows",
            Some(json!({"id": format!("s{}", i), "amount": i * 10, "currency": "eur"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(row["id"], format!("s{}", i));
    }

    let view = wait_for_view(&app, "/api/v1/feeds/sales", |v| {
        item_ids(v).first().map(String::as_str) == Some("s7")
    })
    .await;
    assert_eq!(item_ids(&view), vec!["s7", "s6", "s5", "s4", "s3"]);
    assert_eq!(view["capacity"], 5);
    assert_eq!(view["items"][0]["currency"], "EUR");

    let (status, rows) = call(&app, "GET", "/api/v1/tables/sales/rows?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows.as_array().unwrap().len(), 2);
    assert_eq!(rows[0]["id"], "s7");
}

#[tokio::test]
async fn malformed_rows_are_stored_but_not_rendered() {
    let (_tmp, app) = test_app().await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/tables/geo_threats/rows",
        Some(json!({"id": "bad", "latitude": 123.0, "longitude": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    call(
        &app,
        "POST",
        "/api/v1/tables/geo_threats/rows",
        Some(json!({"id": "good", "latitude": 12.5, "longitude": 40})),
    )
    .await;

    let view = wait_for_view(&app, "/api/v1/feeds/geo-threats", |v| {
        v["diagnostics"]["malformed"] == 1 && !item_ids(v).is_empty()
    })
    .await;
    assert_eq!(item_ids(&view), vec!["good"]);
    assert_eq!(view["diagnostics"]["malformed"], 1);
}

#[tokio::test]
async fn tenant_feed_mounts_on_first_access() {
    let (_tmp, app) = test_app().await;
    for (id, tenant) in [("a1", "acme"), ("o1", "other"), ("a2", "acme")] {
        call(
            &app,
            "POST",
            "/api/v1/tables/audit_anomalies/rows",
            Some(json!({
                "id": id,
                "tenantId": tenant,
                "tableName": "invoices",
                "action": "DELETE",
                "riskScore": 80
            })),
        )
        .await;
    }

    let (status, view) = call(&app, "GET", "/api/v1/feeds/audit-anomalies?tenantId=acme", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["channel"], "audit-anomalies:acme");
    assert_eq!(item_ids(&view), vec!["a2", "a1"]);

    let (_, feeds) = call(&app, "GET", "/api/v1/feeds", None).await;
    assert_eq!(feeds.as_array().unwrap().len(), 5);

    call(
        &app,
        "POST",
        "/api/v1/tables/audit_anomalies/rows",
        Some(json!({"id": "o2", "tenantId": "other", "tableName": "users", "action": "UPDATE", "riskScore": 10})),
    )
    .await;
    call(
        &app,
        "POST",
        "/api/v1/tables/audit_anomalies/rows",
        Some(json!({"id": "a3", "tenantId": "acme", "tableName": "users", "action": "UPDATE", "riskScore": 10})),
    )
    .await;
    let view = wait_for_view(&app, "/api/v1/feeds/audit-anomalies?tenantId=acme", |v| {
        item_ids(v).len() == 3
    })
    .await;
    assert_eq!(item_ids(&view), vec!["a3", "a2", "a1"]);
}

#[tokio::test]
async fn unmount_then_remount() {
    let (_tmp, app) = test_app().await;
    call(
        &app,
        "POST",
        "/api/v1/tables/telemetry_pulses/rows",
        Some(json!({"id": 1, "source": "edge-1", "metric": "cpu", "value": 0.5})),
    )
    .await;

    let (status, view) = call(&app, "POST", "/api/v1/feeds/telemetry/unmount", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["phase"], "unmounted");
    assert_eq!(view["status"]["state"], "idle");
    assert!(item_ids(&view).is_empty());

    let (_, feeds) = call(&app, "GET", "/api/v1/feeds", None).await;
    assert_eq!(feeds.as_array().unwrap().len(), 3);
    let (status, _) = call(&app, "POST", "/api/v1/feeds/telemetry/unmount", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, view) = call(&app, "POST", "/api/v1/feeds/telemetry/mount", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"]["state"], "live");
    assert_eq!(view["items"][0]["id"], "1");
}

#[tokio::test]
async fn errors_use_json_bodies() {
    let (_tmp, app) = test_app().await;

    let (status, body) = call(&app, "GET", "/api/v1/feeds/payroll", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/tables/Bad-Name/rows",
        Some(json!({"id": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);

    let row = json!({"id": "dup", "amount": 1});
    call(&app, "POST", "/api/v1/tables/sales/rows", Some(row.clone())).await;
    let (status, body) = call(&app, "POST", "/api/v1/tables/sales/rows", Some(row)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 409);

    let (status, _) = call(&app, "POST", "/api/v1/feeds/sales/unmount?tenantId=nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tenant_feeds_past_the_limit_are_refused() {
    let (_tmp, app) = test_app_with(&[("BD_MAX_TENANT_FEEDS", "1")]).await;

    let (status, _) = call(&app, "GET", "/api/v1/feeds/sales?tenantId=acme", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, "GET", "/api/v1/feeds/sales?tenantId=globex", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], 429);

    let (status, _) = call(&app, "POST", "/api/v1/feeds/sales/unmount?tenantId=acme", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, view) = call(&app, "GET", "/api/v1/feeds/sales?tenantId=globex", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["channel"], "live-sales:globex");
}
