//! HTTP API for operators, health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use fleet_lib::{
    clients::PowerAction,
    health::{components, ComponentStatus},
    FleetError, Orchestrator, PolicyUpdate,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// FleetError wrapper carrying the HTTP mapping
struct ApiError(FleetError);

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FleetError::Validation(_) => StatusCode::BAD_REQUEST,
            FleetError::NotFound { .. } => StatusCode::NOT_FOUND,
            FleetError::Busy(_) => StatusCode::CONFLICT,
            FleetError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            FleetError::ProvisioningTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            FleetError::Configuration(_) | FleetError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({"error": self.0.to_string(), "code": self.0.code()});
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Health check response - returns 200 if healthy, 503 if unhealthy.
/// The monitor's freshness probe runs on every request, so a stalled
/// polling loop cannot keep serving its last per-tick status.
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let mut health = orchestrator.health_registry().health().await;
    if orchestrator.config().monitoring.enabled {
        health.apply_probe(
            components::MONITOR,
            orchestrator.monitor().health_check().await,
        );
    }

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.orchestrator.health_registry().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError(FleetError::internal(format!("metrics encoding: {}", e)))
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct NodesQuery {
    node: Option<String>,
    #[serde(default)]
    metrics: bool,
}

/// Node summaries, or raw latest metric samples with `metrics=true`
async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NodesQuery>,
) -> Response {
    let monitor = state.orchestrator.monitor();
    if query.metrics {
        let samples = monitor.node_metrics(query.node.as_deref()).await;
        Json(samples).into_response()
    } else {
        let summaries = monitor.node_summaries().await;
        Json(summaries).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct MetricHistoryQuery {
    node: Option<String>,
    since: Option<i64>,
}

/// Retained metric samples within the configured retention window
async fn metric_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricHistoryQuery>,
) -> Response {
    let samples = state
        .orchestrator
        .monitor()
        .metric_history(query.node.as_deref(), query.since)
        .await;
    Json(samples).into_response()
}

/// Cluster-wide aggregates from the latest completed poll
async fn cluster_metrics(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let metrics = state
        .orchestrator
        .monitor()
        .cluster_metrics()
        .await
        .ok_or_else(|| FleetError::not_found("cluster metrics", "latest"))?;
    Ok(Json(metrics).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeActionRequest {
    action: Option<String>,
    node_name: Option<String>,
}

async fn node_action(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NodeActionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let action = request
        .action
        .as_deref()
        .ok_or_else(|| FleetError::validation("missing required field: action"))?;
    let node = request
        .node_name
        .as_deref()
        .ok_or_else(|| FleetError::validation("missing required field: nodeName"))?;

    info!(action = %action, node = %node, "Node action requested");
    let lifecycle = state.orchestrator.lifecycle();
    match action {
        "cordon" => lifecycle.cordon(node).await?,
        "uncordon" => lifecycle.uncordon(node).await?,
        "drain" => lifecycle.drain(node).await?,
        "reboot" => lifecycle.power_action(node, PowerAction::Reboot).await?,
        "poweroff" => lifecycle.power_action(node, PowerAction::PowerOff).await?,
        "poweron" => lifecycle.power_action(node, PowerAction::PowerOn).await?,
        "decommission" => lifecycle.decommission_node(node).await?,
        other => {
            return Err(
                FleetError::validation(format!("unknown action '{}'", other)).into(),
            )
        }
    }

    Ok(Json(
        json!({"success": true, "action": action, "nodeName": node}),
    ))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    #[serde(default)]
    open: bool,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Response {
    let alerts = state.orchestrator.monitor().alerts(query.open).await;
    Json(alerts).into_response()
}

async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Response> {
    let alert = state.orchestrator.monitor().acknowledge_alert(id).await?;
    Ok(Json(alert).into_response())
}

async fn list_policies(State(state): State<Arc<AppState>>) -> Response {
    let policies = state.orchestrator.autoscaler().policies().await;
    Json(policies).into_response()
}

async fn update_policy(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(update): Json<PolicyUpdate>,
) -> ApiResult<Response> {
    let policy = state
        .orchestrator
        .autoscaler()
        .update_policy(&name, &update)
        .await?;
    Ok(Json(policy).into_response())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn scaling_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let history = state.orchestrator.autoscaler().history(query.limit).await;
    Json(history).into_response()
}

async fn registry_repositories(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let registry = state
        .orchestrator
        .registry()
        .ok_or_else(|| FleetError::not_found("module", "registry"))?;
    let repositories = registry.list_repositories().await?;
    Ok(Json(repositories).into_response())
}

#[derive(Debug, Deserialize)]
struct DeleteImageQuery {
    repository: Option<String>,
    tag: Option<String>,
}

async fn registry_delete_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteImageQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let registry = state
        .orchestrator
        .registry()
        .ok_or_else(|| FleetError::not_found("module", "registry"))?;
    let repository = query
        .repository
        .as_deref()
        .ok_or_else(|| FleetError::validation("missing required parameter: repository"))?;
    let tag = query
        .tag
        .as_deref()
        .ok_or_else(|| FleetError::validation("missing required parameter: tag"))?;

    registry.delete_image(repository, tag).await?;
    Ok(Json(json!({"success": true, "repository": repository, "tag": tag})))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/action", post(node_action))
        .route("/api/v1/metrics/history", get(metric_history))
        .route("/api/v1/cluster/metrics", get(cluster_metrics))
        .route("/api/v1/alerts", get(list_alerts))
        .route("/api/v1/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/api/v1/policies", get(list_policies))
        .route("/api/v1/policies/:name", patch(update_policy))
        .route("/api/v1/scaling/history", get(scaling_history))
        .route("/api/v1/registry/repositories", get(registry_repositories))
        .route("/api/v1/registry/image", delete(registry_delete_image))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
