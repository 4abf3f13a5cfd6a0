//! HTTP API for the coordinator
//!
//! Clients use the DDL endpoints under `/databases`; tablet servers use the
//! `/internal` endpoints to report replication state and register
//! themselves. Errors are returned as `{"code": ..., "message": ...}` with a
//! status derived from the error code.
//!
//! Notifications of committed state changes are streamed on `/watch/sse`.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{ApiError, Error};
use crate::coordinator::messages::{
    AdjustIsrRequest, CommitKvSnapshotRequest, CommitLakeTableSnapshotRequest,
    CommitRemoteLogManifestRequest, CreateDatabaseRequest, CreateTableRequest,
    DropDatabaseRequest, DropTableRequest, RegisterTabletServerRequest,
};
use crate::coordinator::service::CoordinatorService;
use crate::metadata::{ServerId, TablePath};
use async_stream::stream;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{sse::Event, IntoResponse, Response, Sse},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
pub struct CoordState {
    pub service: Arc<CoordinatorService>,
}

/// Error rendered as a JSON body.
pub struct HttpError(Error);

impl From<Error> for HttpError {
    fn from(e: Error) -> Self {
        HttpError(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.0.to_http_status();
        let body: ApiError = self.0.to_api_error();
        (status, Json(body)).into_response()
    }
}

type HttpResult<T> = std::result::Result<T, HttpError>;

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        // Databases
        .route("/databases", axum::routing::post(create_database))
        .route("/databases", axum::routing::get(list_databases))
        .route("/databases/:db", axum::routing::get(get_database))
        .route("/databases/:db", axum::routing::delete(drop_database))
        // Tables
        .route("/databases/:db/tables", axum::routing::post(create_table))
        .route("/databases/:db/tables", axum::routing::get(list_tables))
        .route("/databases/:db/tables/:table", axum::routing::get(get_table))
        .route(
            "/databases/:db/tables/:table",
            axum::routing::delete(drop_table),
        )
        // Tablet server reports
        .route("/internal/adjust-isr", axum::routing::post(adjust_isr))
        .route("/internal/kv-snapshots", axum::routing::post(commit_kv_snapshot))
        .route(
            "/internal/remote-log-manifests",
            axum::routing::post(commit_remote_log_manifest),
        )
        .route(
            "/internal/lake-snapshots",
            axum::routing::post(commit_lake_table_snapshot),
        )
        // Tablet server membership
        .route(
            "/internal/tablet-servers",
            axum::routing::post(register_tablet_server),
        )
        .route(
            "/internal/tablet-servers",
            axum::routing::get(list_tablet_servers),
        )
        .route(
            "/internal/tablet-servers/:id/heartbeat",
            axum::routing::post(heartbeat),
        )
        .route(
            "/internal/tablet-servers/:id",
            axum::routing::delete(unregister_tablet_server),
        )
        .route("/watch/sse", axum::routing::get(watch_sse))
        .route("/health", axum::routing::get(health))
        .route("/metrics", axum::routing::get(metrics))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Databases
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateDatabaseBody {
    name: String,
    #[serde(default)]
    descriptor: Option<serde_json::Value>,
    #[serde(default)]
    ignore_if_exists: bool,
}

#[derive(Debug, Default, Deserialize)]
struct DropDatabaseParams {
    #[serde(default)]
    ignore_if_not_exists: bool,
    #[serde(default)]
    cascade: bool,
}

async fn create_database(
    State(state): State<CoordState>,
    Json(body): Json<CreateDatabaseBody>,
) -> HttpResult<impl IntoResponse> {
    let database_json = body
        .descriptor
        .map(|d| serde_json::to_vec(&d))
        .transpose()
        .map_err(Error::from)?;
    state
        .service
        .create_database(CreateDatabaseRequest {
            database_name: body.name.clone(),
            database_json,
            ignore_if_exists: body.ignore_if_exists,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "database": body.name }))))
}

async fn list_databases(State(state): State<CoordState>) -> HttpResult<impl IntoResponse> {
    let databases = state.service.list_databases().await?;
    Ok(Json(json!({ "databases": databases })))
}

async fn get_database(
    State(state): State<CoordState>,
    Path(db): Path<String>,
) -> HttpResult<impl IntoResponse> {
    let database = state.service.get_database(&db).await?;
    Ok(Json(database))
}

async fn drop_database(
    State(state): State<CoordState>,
    Path(db): Path<String>,
    Query(params): Query<DropDatabaseParams>,
) -> HttpResult<impl IntoResponse> {
    let response = state
        .service
        .drop_database(DropDatabaseRequest {
            database_name: db,
            ignore_if_not_exists: params.ignore_if_not_exists,
            cascade: params.cascade,
        })
        .await?;
    Ok(Json(response))
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateTableBody {
    name: String,
    descriptor: serde_json::Value,
    #[serde(default)]
    ignore_if_exists: bool,
}

#[derive(Debug, Default, Deserialize)]
struct DropTableParams {
    #[serde(default)]
    ignore_if_not_exists: bool,
}

async fn create_table(
    State(state): State<CoordState>,
    Path(db): Path<String>,
    Json(body): Json<CreateTableBody>,
) -> HttpResult<impl IntoResponse> {
    let table_json = serde_json::to_vec(&body.descriptor).map_err(Error::from)?;
    let response = state
        .service
        .create_table(CreateTableRequest {
            table_path: TablePath::new(db, body.name),
            table_json,
            ignore_if_exists: body.ignore_if_exists,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_tables(
    State(state): State<CoordState>,
    Path(db): Path<String>,
) -> HttpResult<impl IntoResponse> {
    let tables = state.service.list_tables(&db).await?;
    Ok(Json(json!({ "database": db, "tables": tables })))
}

async fn get_table(
    State(state): State<CoordState>,
    Path((db, table)): Path<(String, String)>,
) -> HttpResult<impl IntoResponse> {
    let registration = state.service.get_table(&TablePath::new(db, table)).await?;
    Ok(Json(registration))
}

async fn drop_table(
    State(state): State<CoordState>,
    Path((db, table)): Path<(String, String)>,
    Query(params): Query<DropTableParams>,
) -> HttpResult<impl IntoResponse> {
    let response = state
        .service
        .drop_table(DropTableRequest {
            table_path: TablePath::new(db, table),
            ignore_if_not_exists: params.ignore_if_not_exists,
        })
        .await?;
    Ok(Json(response))
}

// ============================================================================
// Tablet server reports
// ============================================================================

async fn adjust_isr(
    State(state): State<CoordState>,
    Json(request): Json<AdjustIsrRequest>,
) -> HttpResult<impl IntoResponse> {
    let response = state.service.adjust_isr(request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct CommitKvSnapshotBody {
    completed_snapshot: serde_json::Value,
    coordinator_epoch: i32,
    bucket_leader_epoch: i32,
}

async fn commit_kv_snapshot(
    State(state): State<CoordState>,
    Json(body): Json<CommitKvSnapshotBody>,
) -> HttpResult<impl IntoResponse> {
    let completed_snapshot = serde_json::to_vec(&body.completed_snapshot).map_err(Error::from)?;
    let response = state
        .service
        .commit_kv_snapshot(CommitKvSnapshotRequest {
            completed_snapshot,
            coordinator_epoch: body.coordinator_epoch,
            bucket_leader_epoch: body.bucket_leader_epoch,
        })
        .await?;
    Ok(Json(response))
}

async fn commit_remote_log_manifest(
    State(state): State<CoordState>,
    Json(request): Json<CommitRemoteLogManifestRequest>,
) -> HttpResult<impl IntoResponse> {
    let response = state.service.commit_remote_log_manifest(request).await?;
    Ok(Json(response))
}

async fn commit_lake_table_snapshot(
    State(state): State<CoordState>,
    Json(request): Json<CommitLakeTableSnapshotRequest>,
) -> HttpResult<impl IntoResponse> {
    let response = state.service.commit_lake_table_snapshot(request).await?;
    Ok(Json(response))
}

// ============================================================================
// Tablet server membership
// ============================================================================

async fn register_tablet_server(
    State(state): State<CoordState>,
    Json(request): Json<RegisterTabletServerRequest>,
) -> HttpResult<impl IntoResponse> {
    let server_id = request.server_id;
    state.service.register_tablet_server(request).await?;
    Ok((StatusCode::CREATED, Json(json!({ "server_id": server_id }))))
}

async fn list_tablet_servers(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({ "live_servers": state.service.live_servers() }))
}

async fn heartbeat(
    State(state): State<CoordState>,
    Path(server_id): Path<ServerId>,
) -> impl IntoResponse {
    if state.service.heartbeat(server_id).await {
        (StatusCode::OK, Json(json!({ "server_id": server_id })))
    } else {
        // unknown or expired, the server has to register again
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "server_id": server_id, "error": "Tablet server is not registered" })),
        )
    }
}

async fn unregister_tablet_server(
    State(state): State<CoordState>,
    Path(server_id): Path<ServerId>,
) -> HttpResult<impl IntoResponse> {
    let removed = state.service.unregister_tablet_server(server_id).await?;
    Ok(Json(json!({ "server_id": server_id, "removed": removed })))
}

// ============================================================================
// Notifications, health and metrics
// ============================================================================

/// SSE stream of committed state changes
async fn watch_sse(
    State(state): State<CoordState>,
) -> Sse<impl futures_util::Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = state.service.subscribe();
    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(notification) => match serde_json::to_string(&notification) {
                    Ok(data) => yield Ok(Event::default().data(data)),
                    Err(e) => tracing::warn!("Dropping unserializable notification: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Watch stream lagged, skipped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream)
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "coordinator_epoch": state.service.coordinator_epoch(),
        "live_servers": state.service.live_servers().len(),
        "uptime_seconds": state.service.metrics().uptime_seconds(),
        "version": crate::VERSION,
    }))
}

async fn metrics(State(state): State<CoordState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.service.metrics().to_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CoordinatorConfig;
    use crate::coordinator::store::MemoryMetaStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> (Arc<CoordinatorService>, Router) {
        let service = Arc::new(
            CoordinatorService::start(
                CoordinatorConfig::default(),
                Arc::new(MemoryMetaStore::new()),
            )
            .unwrap(),
        );
        let router = create_router(CoordState {
            service: service.clone(),
        });
        (service, router)
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), MAX_BODY_BYTES).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (service, router) = router();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = json_body(response).await;
        assert_eq!(body["coordinator_epoch"], 0);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_body_carries_code() {
        let (service, router) = router();
        let response = router
            .oneshot(Request::get("/databases/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["code"], "DATABASE_NOT_EXIST");
        assert_eq!(body["retryable"], false);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_create_database_twice_conflicts() {
        let (service, router) = router();
        let request = json!({ "name": "fluss" });
        let response = router
            .clone()
            .oneshot(post("/databases", request.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router.oneshot(post("/databases", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["code"], "DATABASE_ALREADY_EXISTS");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_heartbeat_is_not_found() {
        let (service, router) = router();
        let response = router
            .oneshot(post("/internal/tablet-servers/9/heartbeat", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        service.shutdown().await;
    }
}
