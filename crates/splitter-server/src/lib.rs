//! HTTP surface for the universe splitter.
//!
//! `POST /api/v1/split` with `{"idempotency_id": "..."}` records (or replays)
//! one quantum-random value per id. Every request runs under its own
//! cancellation token, fired by the request timeout or by the client going
//! away, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use splitter_core::pool::{EntropyPool, SourceHealth};
use splitter_core::{Counters, SplitError, SplitOutcome, Splitter};

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared server state.
pub struct AppState {
    splitter: Arc<Splitter>,
    pool: Arc<EntropyPool>,
    request_timeout: Duration,
}

impl AppState {
    /// `pool` should be the same pool `splitter` draws from; it is only read
    /// for health reporting.
    pub fn new(splitter: Arc<Splitter>, pool: Arc<EntropyPool>) -> Self {
        Self {
            splitter,
            pool,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct SplitRequest {
    idempotency_id: String,
}

#[derive(Debug, Serialize)]
struct SplitResponse {
    success: bool,
    idempotency_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<i64>,
    /// Comma-joined providers that contributed to `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<DateTime<Utc>>,
    /// Error message if the request failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SplitResponse {
    fn ok(outcome: SplitOutcome) -> Self {
        Self {
            success: true,
            idempotency_id: outcome.idempotency_id,
            result: Some(outcome.result),
            source: Some(outcome.source_description),
            before: Some(outcome.before),
            after: Some(outcome.after),
            error: None,
        }
    }

    fn failed(idempotency_id: String, err: &SplitError) -> Self {
        Self {
            success: false,
            idempotency_id,
            result: None,
            source: None,
            before: None,
            after: None,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    success: bool,
    counters: Counters,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    sources_healthy: usize,
    sources_total: usize,
    sources: Vec<SourceHealth>,
}

fn status_for(err: &SplitError) -> StatusCode {
    match err {
        SplitError::EmptyId => StatusCode::BAD_REQUEST,
        SplitError::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        SplitError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SplitError::Source(_) => StatusCode::BAD_GATEWAY,
    }
}

async fn handle_split(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SplitRequest>,
) -> (StatusCode, Json<SplitResponse>) {
    // Fires on timeout, or when axum drops this future because the client left.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let id = request.idempotency_id;
    let split = state.splitter.split(&id, &cancel);
    tokio::pin!(split);
    let outcome = tokio::select! {
        out = &mut split => out,
        _ = tokio::time::sleep(state.request_timeout) => {
            cancel.cancel();
            split.await
        }
    };

    match outcome {
        Ok(outcome) => (StatusCode::OK, Json(SplitResponse::ok(outcome))),
        Err(err) => {
            warn!("split {id:?} failed: {err}");
            (
                status_for(&err),
                Json(SplitResponse::failed(id.clone(), &err)),
            )
        }
    }
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> (StatusCode, Json<StatsResponse>) {
    match state.splitter.store().read_counters().await {
        Ok(counters) => (
            StatusCode::OK,
            Json(StatsResponse {
                success: true,
                counters,
                error: None,
            }),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatsResponse {
                success: false,
                counters: Counters::new(),
                error: Some(err.to_string()),
            }),
        ),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let report = state.pool.health_report();
    Json(HealthResponse {
        status: if report.healthy > 0 {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        sources_healthy: report.healthy,
        sources_total: report.total,
        sources: report.sources,
    })
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = state.splitter.config();
    Json(serde_json::json!({
        "name": "Universe Splitter",
        "version": splitter_core::VERSION,
        "sources": state.pool.source_names(),
        "freshness_window_ms": config.freshness_window.as_millis() as u64,
        "request_timeout_ms": state.request_timeout.as_millis() as u64,
        "endpoints": {
            "/": "This API index",
            "/api/v1/split": {
                "method": "POST",
                "description": "Split the universe once per idempotency id",
                "body": { "idempotency_id": "Non-empty caller-chosen id; retries reuse it" },
            },
            "/stats": "Operation and replay counters",
            "/health": "Health check with per-source status",
        },
    }))
}

/// Build the axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/api/v1/split", post(handle_split))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .with_state(Arc::new(state))
}

/// Run the HTTP server until Ctrl-C.
pub async fn run_server(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("universe splitter listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitter_core::testing::{FailingSource, HangingSource, StaticSource};
    use splitter_core::{
        EntropySource, MemoryStore, OPERATION_COUNT, OperationStore, REPLAY_COUNT, SystemClock,
    };

    fn state_with(sources: Vec<Arc<dyn EntropySource>>) -> Arc<AppState> {
        let pool = Arc::new(EntropyPool::with_sources(sources));
        let splitter = Arc::new(Splitter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            pool.clone(),
        ));
        Arc::new(AppState::new(splitter, pool))
    }

    fn request(id: &str) -> Json<SplitRequest> {
        Json(SplitRequest {
            idempotency_id: id.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // /api/v1/split
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_split_returns_combined_value() {
        let state = state_with(vec![
            Arc::new(StaticSource::new("A", 0x00FF)),
            Arc::new(StaticSource::new("B", 0xFF00)),
        ]);
        let (status, Json(body)) = handle_split(State(state), request("abc")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert_eq!(body.idempotency_id, "abc");
        assert_eq!(body.result, Some(0xFFFF));
        assert_eq!(body.source.as_deref(), Some("A,B"));
        assert!(body.before.unwrap() <= body.after.unwrap());
        assert!(body.error.is_none());
    }

    #[tokio::test]
    async fn test_split_replays_same_body() {
        let state = state_with(vec![Arc::new(StaticSource::new("A", 1))]);
        let (_, Json(first)) = handle_split(State(state.clone()), request("same")).await;
        let (_, Json(second)) = handle_split(State(state.clone()), request("same")).await;
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );

        let counters = state.splitter.store().read_counters().await.unwrap();
        assert_eq!(counters.get(OPERATION_COUNT), 1);
        assert_eq!(counters.get(REPLAY_COUNT), 1);
    }

    #[tokio::test]
    async fn test_empty_id_is_bad_request() {
        let state = state_with(vec![Arc::new(StaticSource::new("A", 1))]);
        let (status, Json(body)) = handle_split(State(state), request("")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert!(body.result.is_none());
        assert!(body.error.unwrap().contains("must not be empty"));
    }

    #[tokio::test]
    async fn test_total_outage_is_bad_gateway() {
        let state = state_with(vec![Arc::new(FailingSource::new("DOWN"))]);
        let (status, Json(body)) = handle_split(State(state), request("dark")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.idempotency_id, "dark");
        assert!(body.error.unwrap().contains("DOWN"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_gateway_timeout() {
        let pool = Arc::new(EntropyPool::with_sources([
            Arc::new(HangingSource::new("SLOW")) as Arc<dyn EntropySource>,
        ]));
        let splitter = Arc::new(Splitter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            pool.clone(),
        ));
        let state = Arc::new(
            AppState::new(splitter, pool).with_request_timeout(Duration::from_millis(100)),
        );
        let (status, Json(body)) = handle_split(State(state), request("slow")).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert!(!body.success);
        assert_eq!(body.idempotency_id, "slow");
    }

    #[test]
    fn test_error_status_mapping() {
        use splitter_core::{SourceError, StoreError};
        assert_eq!(status_for(&SplitError::EmptyId), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&SplitError::Cancelled), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&SplitError::Storage(StoreError::NotFound { id: "x".into() })),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&SplitError::Source(SourceError::NoSources)),
            StatusCode::BAD_GATEWAY
        );
    }

    // -----------------------------------------------------------------------
    // Other endpoints
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_stats_reports_counters() {
        let state = state_with(vec![Arc::new(StaticSource::new("A", 1))]);
        handle_split(State(state.clone()), request("one")).await;
        let (status, Json(body)) = handle_stats(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.counters.get(OPERATION_COUNT), 1);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["counters"]["OperationCount"], 1);
    }

    #[tokio::test]
    async fn test_health_reflects_sources() {
        let state = state_with(vec![
            Arc::new(StaticSource::new("UP", 1)),
            Arc::new(FailingSource::new("DOWN")),
        ]);
        handle_split(State(state.clone()), request("probe")).await;
        let Json(health) = handle_health(State(state)).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.sources_total, 2);
        assert_eq!(health.sources_healthy, 1);
    }

    #[tokio::test]
    async fn test_index_lists_endpoints() {
        let state = state_with(vec![Arc::new(StaticSource::new("A", 1))]);
        let Json(index) = handle_index(State(state)).await;
        assert_eq!(index["version"], splitter_core::VERSION);
        assert_eq!(index["sources"][0], "A");
        assert!(index["endpoints"]["/api/v1/split"].is_object());
    }

    #[test]
    fn test_router_builds() {
        let pool = Arc::new(EntropyPool::new());
        let splitter = Arc::new(Splitter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            pool.clone(),
        ));
        let _router = build_router(AppState::new(splitter, pool));
    }
}
