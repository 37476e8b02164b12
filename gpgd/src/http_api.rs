//! HTTP API for job triggers, ingestion, and observability endpoints.
//!
//! Provides:
//! - `POST /executions` - record ingestion (bearer-token guarded)
//! - `POST /jobs/recompute-stats` - stats + integrity graph pass
//! - `POST /jobs/integrity` - standalone integrity pass
//! - `POST /jobs/recompute-reliability` - reliability metrics pass
//! - `GET /signals` - cached read-side signals and blended score
//! - `GET /reliability/{agent_id}` - committed per-agent metric row
//! - `GET /metrics` - Prometheus metrics export
//! - `GET /health` - basic daemon health check
//!
//! The trigger endpoints treat the caller as opaque: a shared-secret
//! bearer token is the whole contract, and every trigger is idempotent
//! and safe to invoke more often than strictly necessary.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use gpg_common::{
    AgentId, ClusterId, ExecOutcome, ExecutionId, ExecutionPath, FailureCode, GpgConfig,
    PipelineExecution, TaskType,
};
use serde::Deserialize;
use serde_json::json;

use crate::caches::SignalCaches;
use crate::jobs::JobRunner;
use crate::metrics::Metrics;
use crate::scoring::SignalEngine;
use crate::store::ExecutionStore;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<ExecutionStore>,
    pub runner: Arc<JobRunner>,
    pub engine: Arc<SignalEngine>,
    pub caches: Arc<SignalCaches>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<GpgConfig>,
    /// Daemon version.
    pub version: &'static str,
    /// Daemon start time.
    pub started_at: Instant,
    /// Daemon PID.
    pub pid: u32,
}

/// Create the HTTP router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/signals", get(signals_handler))
        .route("/reliability/{agent_id}", get(reliability_handler))
        .route("/executions", post(ingest_handler))
        .route("/jobs/recompute-stats", post(recompute_stats_handler))
        .route("/jobs/integrity", post(integrity_handler))
        .route(
            "/jobs/recompute-reliability",
            post(recompute_reliability_handler),
        )
        .with_state(Arc::new(state))
}

/// Reject callers without the shared-secret bearer token.
///
/// No token configured means the trigger boundary is closed entirely.
fn authorize(state: &HttpState, headers: &HeaderMap) -> Result<(), axum::response::Response> {
    let Some(expected) = state.config.trigger_token.as_deref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "trigger token not configured" })),
        )
            .into_response());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid bearer token" })),
        )
            .into_response()),
    }
}

/// Handler for `/health` - basic daemon health check.
async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "pid": state.pid,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Handler for `/metrics` - Prometheus metrics export.
async fn metrics_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SignalsQuery {
    /// Cluster attribution for the request, if any.
    cluster: Option<String>,
    /// Caller-supplied legacy heuristic score.
    legacy: Option<f64>,
}

/// Handler for `/signals` - read-side signals for one decision request.
///
/// Served through the recommendation cache; never fails for missing
/// graph data.
async fn signals_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<SignalsQuery>,
) -> impl IntoResponse {
    let cluster_id = query.cluster.map(ClusterId::new);
    let signals = state
        .caches
        .cached_signals(&state.engine, &state.metrics, cluster_id.as_ref());
    let execute_score = query
        .legacy
        .map(|legacy| state.engine.blend_execute_score(legacy, Some(signals.gpg_score)));

    Json(json!({
        "signals": signals,
        "execute_score": execute_score,
    }))
}

/// Handler for `/reliability/{agent_id}` - committed metric row.
async fn reliability_handler(
    State(state): State<Arc<HttpState>>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    match state
        .runner
        .reliability()
        .metric_for(&AgentId::new(agent_id))
        .await
    {
        Some(metric) => Json(metric).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no metrics for agent" })),
        )
            .into_response(),
    }
}

/// Ingestion payload for one completed execution.
#[derive(Debug, Deserialize)]
pub struct IngestPayload {
    pub agent_id: String,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub execution_path: Option<String>,
    /// "success" or a failure description.
    pub status: String,
    #[serde(default)]
    pub failure_code: Option<String>,
    pub cost_usd: f64,
    pub latency_ms: f64,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl IngestPayload {
    /// Validate into a record. Unrecognized enum values canonicalize to
    /// their documented defaults; nothing is silently dropped.
    fn into_execution(self) -> PipelineExecution {
        let outcome = if self.status.eq_ignore_ascii_case("success") {
            ExecOutcome::Success
        } else {
            let raw = self.failure_code.as_deref().unwrap_or(&self.status);
            ExecOutcome::Failure(FailureCode::parse(raw))
        };
        PipelineExecution {
            id: ExecutionId::generate(),
            agent_id: AgentId::new(self.agent_id),
            task_type: TaskType::parse(self.task_type.as_deref().unwrap_or("general")),
            execution_path: ExecutionPath::parse(self.execution_path.as_deref().unwrap_or("single")),
            outcome,
            cost_usd: self.cost_usd,
            latency_ms: self.latency_ms,
            recorded_at: self.recorded_at.unwrap_or_else(Utc::now),
            cluster_id: self.cluster_id.map(ClusterId::new),
        }
    }
}

/// Handler for `POST /executions` - append one execution record.
async fn ingest_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(payload): Json<IngestPayload>,
) -> axum::response::Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    let execution = payload.into_execution();
    let id = execution.id;
    match state.store.append(execution) {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Handler for `POST /jobs/recompute-stats`.
async fn recompute_stats_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    match state.runner.run_stats_pass().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Handler for `POST /jobs/integrity`.
async fn integrity_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    Json(state.runner.run_integrity_pass()).into_response()
}

/// Handler for `POST /jobs/recompute-reliability`.
async fn recompute_reliability_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    match state.runner.run_reliability_pass().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
