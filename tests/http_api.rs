//! HTTP API tests driven through the router without a socket

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tablecoord::common::CoordinatorConfig;
use tablecoord::coordinator::http::{create_router, CoordState};
use tablecoord::coordinator::{CoordinatorService, MemoryMetaStore};
use tower::ServiceExt;

fn setup() -> (Arc<CoordinatorService>, Router) {
    let service = Arc::new(
        CoordinatorService::start(CoordinatorConfig::default(), Arc::new(MemoryMetaStore::new()))
            .unwrap(),
    );
    let router = create_router(CoordState {
        service: service.clone(),
    });
    (service, router)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_table_lifecycle_over_http() {
    let (service, router) = setup();

    let (status, _) = send(
        &router,
        "POST",
        "/internal/tablet-servers",
        Some(json!({ "server_id": 1, "endpoint": "localhost:9201" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&router, "POST", "/databases", Some(json!({ "name": "fluss" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &router,
        "POST",
        "/databases/fluss/tables",
        Some(json!({
            "name": "orders",
            "descriptor": {
                "schema": {"columns": [{"name": "id", "data_type": {"type": "BIGINT"}}]},
                "distribution": {"bucket_count": 2}
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let table_id = body["table_id"].as_i64().unwrap();

    let (status, body) = send(&router, "GET", "/databases/fluss/tables", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tables"], json!(["orders"]));

    let (status, body) = send(&router, "GET", "/databases/fluss/tables/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["table_id"].as_i64(), Some(table_id));

    // the only live server leads both buckets
    let (status, body) = send(
        &router,
        "POST",
        "/internal/kv-snapshots",
        Some(json!({
            "completed_snapshot": {
                "table_bucket": {"table_id": table_id, "bucket": 1},
                "snapshot_id": 1,
                "snapshot_location": "oss://warehouse/snap-1",
                "log_offset": 42
            },
            "coordinator_epoch": service.coordinator_epoch(),
            "bucket_leader_epoch": 0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["snapshot_id"], 1);

    let (status, body) = send(&router, "DELETE", "/databases/fluss/tables/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["table_id"].as_i64(), Some(table_id));

    let (status, body) = send(&router, "GET", "/databases/fluss/tables/orders", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "TABLE_NOT_EXIST");

    let (status, _) = send(
        &router,
        "DELETE",
        "/databases/fluss/tables/orders?ignore_if_not_exists=true",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    service.shutdown().await;
}

#[tokio::test]
async fn test_drop_with_encoded_separator_is_rejected() {
    let (service, router) = setup();
    send(
        &router,
        "POST",
        "/internal/tablet-servers",
        Some(json!({ "server_id": 1, "endpoint": "localhost:9201" })),
    )
    .await;
    send(&router, "POST", "/databases", Some(json!({ "name": "db" }))).await;
    let (status, body) = send(
        &router,
        "POST",
        "/databases/db/tables",
        Some(json!({
            "name": "t",
            "descriptor": {"schema": {"columns": [{"name": "id", "data_type": {"type": "INT"}}]}}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let table_id = body["table_id"].as_i64().unwrap();

    // decodes to "db/tables/t", the store path of the table registration
    for uri in [
        "/databases/db%2Ftables%2Ft",
        "/databases/db%2Ftables%2Ft?ignore_if_not_exists=true",
        "/databases/db%2Ftables%2Ft?cascade=true",
    ] {
        let (status, body) = send(&router, "DELETE", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_DATABASE_NAME");
    }
    let (status, body) = send(&router, "GET", "/databases/db%2Ftables%2Ft", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_DATABASE_NAME");

    let (status, body) = send(&router, "DELETE", "/databases/db/tables/t%2F..", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_TABLE_NAME");

    // the table and its bucket state are untouched and still accept commits
    let (status, body) = send(&router, "GET", "/databases/db/tables/t", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["table_id"].as_i64(), Some(table_id));
    let (status, _) = send(
        &router,
        "POST",
        "/internal/kv-snapshots",
        Some(json!({
            "completed_snapshot": {
                "table_bucket": {"table_id": table_id, "bucket": 0},
                "snapshot_id": 1,
                "snapshot_location": "oss://warehouse/snap-1",
                "log_offset": 7
            },
            "coordinator_epoch": service.coordinator_epoch(),
            "bucket_leader_epoch": 0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // a real drop removes it, after which commits are rejected
    let (status, _) = send(&router, "DELETE", "/databases/db?cascade=true", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(
        &router,
        "POST",
        "/internal/kv-snapshots",
        Some(json!({
            "completed_snapshot": {
                "table_bucket": {"table_id": table_id, "bucket": 0},
                "snapshot_id": 2,
                "snapshot_location": "oss://warehouse/snap-2",
                "log_offset": 9
            },
            "coordinator_epoch": service.coordinator_epoch(),
            "bucket_leader_epoch": 0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "UNKNOWN_TABLE_OR_BUCKET");
    service.shutdown().await;
}

#[tokio::test]
async fn test_stale_epoch_maps_to_conflict() {
    let (service, router) = setup();
    let (status, body) = send(
        &router,
        "POST",
        "/internal/adjust-isr",
        Some(json!({
            "server_id": 1,
            "coordinator_epoch": service.coordinator_epoch() - 1,
            "buckets": []
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "STALE_EPOCH");
    assert_eq!(body["retryable"], true);
    service.shutdown().await;
}

#[tokio::test]
async fn test_not_enough_servers_is_unavailable() {
    let (service, router) = setup();
    send(&router, "POST", "/databases", Some(json!({ "name": "fluss" }))).await;
    let (status, body) = send(
        &router,
        "POST",
        "/databases/fluss/tables",
        Some(json!({
            "name": "orders",
            "descriptor": {"schema": {"columns": [{"name": "id", "data_type": {"type": "INT"}}]}}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "NOT_ENOUGH_REPLICAS");
    service.shutdown().await;
}

#[tokio::test]
async fn test_tablet_server_membership() {
    let (service, router) = setup();
    send(
        &router,
        "POST",
        "/internal/tablet-servers",
        Some(json!({ "server_id": 4, "endpoint": "localhost:9204", "rack": "r1" })),
    )
    .await;

    let (status, _) = send(&router, "POST", "/internal/tablet-servers/4/heartbeat", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&router, "GET", "/internal/tablet-servers", None).await;
    assert_eq!(body["live_servers"], json!([4]));

    let (status, body) = send(&router, "DELETE", "/internal/tablet-servers/4", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (status, _) = send(&router, "POST", "/internal/tablet-servers/4/heartbeat", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    service.shutdown().await;
}

#[tokio::test]
async fn test_metrics_after_commits() {
    let (service, router) = setup();
    send(
        &router,
        "POST",
        "/internal/lake-snapshots",
        Some(json!({ "coordinator_epoch": service.coordinator_epoch(), "tables": [] })),
    )
    .await;

    // counters are updated right after the result is delivered
    let expected = "tablecoord_events_total{event=\"commit_lake_table_snapshot\"} 1";
    let mut text = String::new();
    for _ in 0..50 {
        let response = router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        text = String::from_utf8(bytes.to_vec()).unwrap();
        if text.contains(expected) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(text.contains("tablecoord_event_queue_size"));
    assert!(text.contains(expected));
    service.shutdown().await;
}
