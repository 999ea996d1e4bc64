//! Integration tests for the fleetd API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use fleet_lib::{
    clients::{
        CloudProvider, CloudServer, ControlPlane, PodRef, PowerAction, ServerSpec, ServerType,
    },
    FleetError, Node, NodeRole, Orchestrator, OrchestratorConfig,
};
use fleetd::api::{create_router, AppState};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

struct StubCloud;

#[async_trait]
impl CloudProvider for StubCloud {
    async fn create_server(&self, spec: &ServerSpec) -> fleet_lib::Result<CloudServer> {
        Ok(CloudServer {
            id: 1,
            name: spec.name.clone(),
            status: "running".into(),
            public_ip: None,
            private_ip: None,
            server_type: spec.server_type.clone(),
            datacenter: spec.datacenter.clone(),
            monthly_price: None,
            created_at: Some(Utc::now().timestamp()),
        })
    }

    async fn get_server(&self, id: u64) -> fleet_lib::Result<CloudServer> {
        Err(FleetError::not_found("server", id.to_string()))
    }

    async fn delete_server(&self, _id: u64) -> fleet_lib::Result<()> {
        Ok(())
    }

    async fn power_action(&self, _id: u64, _action: PowerAction) -> fleet_lib::Result<()> {
        Ok(())
    }

    async fn list_servers(&self, _label_selector: &str) -> fleet_lib::Result<Vec<CloudServer>> {
        Ok(Vec::new())
    }

    async fn list_server_types(&self) -> fleet_lib::Result<Vec<ServerType>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct StubControlPlane {
    nodes: Vec<Node>,
    calls: Mutex<Vec<String>>,
}

fn ready_worker(name: &str) -> Node {
    Node {
        name: name.to_string(),
        role: NodeRole::Worker,
        ready: true,
        schedulable: true,
        cpu_capacity_cores: 4.0,
        cpu_usage_cores: 1.0,
        memory_capacity_bytes: 8_000_000_000,
        memory_usage_bytes: 2_000_000_000,
        disk_capacity_bytes: 80_000_000_000,
        disk_usage_bytes: 8_000_000_000,
        pod_count: 10,
        pod_capacity: 110,
        internal_ip: None,
        external_ip: None,
        instance_type: None,
        datacenter: None,
        monthly_price: None,
        conditions: vec![],
        created_at: Utc::now().timestamp() - 3600,
        last_heartbeat: Utc::now().timestamp(),
    }
}

#[async_trait]
impl ControlPlane for StubControlPlane {
    async fn list_nodes(&self) -> fleet_lib::Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }

    async fn get_node(&self, name: &str) -> fleet_lib::Result<Node> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| FleetError::not_found("node", name))
    }

    async fn set_schedulable(&self, name: &str, schedulable: bool) -> fleet_lib::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("set_schedulable:{}:{}", name, schedulable));
        Ok(())
    }

    async fn list_pods(&self, _node: &str) -> fleet_lib::Result<Vec<PodRef>> {
        Ok(Vec::new())
    }

    async fn evict_pod(
        &self,
        _namespace: &str,
        _name: &str,
        _grace_secs: u64,
    ) -> fleet_lib::Result<()> {
        Ok(())
    }

    async fn force_delete_pod(&self, _namespace: &str, _name: &str) -> fleet_lib::Result<()> {
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> fleet_lib::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete_node:{}", name));
        Ok(())
    }
}

fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.provider.api_token = "token".into();
    config.control_plane.api_url = "https://cp.example:6443".into();
    config.state_dir = std::env::temp_dir();
    config
}

async fn setup_test_app(nodes: Vec<Node>) -> (Router, Arc<Orchestrator>) {
    let control_plane = Arc::new(StubControlPlane {
        nodes,
        calls: Mutex::new(Vec::new()),
    });
    let orchestrator = Arc::new(
        Orchestrator::with_clients(test_config(), Arc::new(StubCloud), control_plane, None)
            .unwrap(),
    );
    let router = create_router(Arc::new(AppState::new(orchestrator.clone())));
    (router, orchestrator)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok() {
    let (app, orch) = setup_test_app(vec![]).await;
    orch.monitor().poll_once().await.unwrap();

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_surfaces_stalled_monitor() {
    let (app, _orch) = setup_test_app(vec![]).await;

    // No poll has completed; the freshness probe must flag the monitor
    // even though no loop has reported a failure either
    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let health = body_json(response).await;
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(health["components"]["monitor"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_tracks_startup() {
    let (app, orch) = setup_test_app(vec![]).await;

    let response = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    orch.health_registry().set_ready(true).await;
    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (app, _orch) = setup_test_app(vec![]).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_list_nodes_after_poll() {
    let (app, orch) = setup_test_app(vec![ready_worker("fleet-worker-a")]).await;
    orch.monitor().poll_once().await.unwrap();

    let response = app.oneshot(get("/api/v1/nodes")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let summaries = body_json(response).await;
    assert_eq!(summaries.as_array().unwrap().len(), 1);
    assert_eq!(summaries[0]["name"], "fleet-worker-a");
    assert_eq!(summaries[0]["status"], "healthy");
}

#[tokio::test]
async fn test_node_metrics_query() {
    let (app, orch) = setup_test_app(vec![ready_worker("fleet-worker-a")]).await;
    orch.monitor().poll_once().await.unwrap();

    let response = app
        .oneshot(get("/api/v1/nodes?metrics=true&node=fleet-worker-a"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let samples = body_json(response).await;
    // cpu, memory, disk and heartbeat samples for the one node
    assert_eq!(samples.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_metric_history_endpoint() {
    let (app, orch) = setup_test_app(vec![ready_worker("fleet-worker-a")]).await;
    orch.monitor().poll_once().await.unwrap();
    orch.monitor().poll_once().await.unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/v1/metrics/history?node=fleet-worker-a"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Two polls, four samples each
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 8);

    let far_future = chrono::Utc::now().timestamp() + 3600;
    let response = app
        .oneshot(get(&format!("/api/v1/metrics/history?since={}", far_future)))
        .await
        .unwrap();
    assert!(body_json(response).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_node_action_missing_fields() {
    let (app, _orch) = setup_test_app(vec![]).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/nodes/action",
            serde_json::json!({"nodeName": "fleet-worker-a"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION");

    let response = app
        .oneshot(post_json(
            "/api/v1/nodes/action",
            serde_json::json!({"action": "cordon"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_node_action_unknown_action() {
    let (app, _orch) = setup_test_app(vec![]).await;

    let response = app
        .oneshot(post_json(
            "/api/v1/nodes/action",
            serde_json::json!({"action": "explode", "nodeName": "fleet-worker-a"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION");
    assert!(body["error"].as_str().unwrap().contains("explode"));
}

#[tokio::test]
async fn test_node_action_cordon() {
    let (app, _orch) = setup_test_app(vec![ready_worker("fleet-worker-a")]).await;

    let response = app
        .oneshot(post_json(
            "/api/v1/nodes/action",
            serde_json::json!({"action": "cordon", "nodeName": "fleet-worker-a"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["action"], "cordon");
}

#[tokio::test]
async fn test_acknowledge_unknown_alert_is_404() {
    let (app, _orch) = setup_test_app(vec![]).await;

    let response = app
        .oneshot(post_json(
            "/api/v1/alerts/42/acknowledge",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_policies_roundtrip() {
    let (app, _orch) = setup_test_app(vec![]).await;

    let response = app.clone().oneshot(get("/api/v1/policies")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let policies = body_json(response).await;
    assert_eq!(policies[0]["name"], "default");

    let response = app
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/v1/policies/default")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({"maxNodes": 8}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["maxNodes"], 8);
}

#[tokio::test]
async fn test_patch_unknown_policy_is_404() {
    let (app, _orch) = setup_test_app(vec![]).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/v1/policies/missing")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scaling_history_empty() {
    let (app, _orch) = setup_test_app(vec![]).await;

    let response = app
        .oneshot(get("/api/v1/scaling/history?limit=10"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_registry_disabled_is_404() {
    let (app, _orch) = setup_test_app(vec![]).await;

    let response = app
        .oneshot(get("/api/v1/registry/repositories"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}
