//! Control plane API client
//!
//! Talks to a Kubernetes-compatible API server: node inventory with live
//! usage merged from the metrics API, cordon/uncordon patches, pod listing
//! and eviction, and node object deletion.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{ControlPlane, PodRef};
use crate::config::ControlPlaneConfig;
use crate::error::{FleetError, Result};
use crate::models::{Node, NodeCondition, NodeRole};

const SERVICE: &str = "control-plane";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

pub struct ControlPlaneClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ControlPlaneClient {
    pub fn new(config: &ControlPlaneConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FleetError::configuration(format!("control plane HTTP client: {}", e)))?;

        let mut base = config.api_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| FleetError::configuration(format!("control plane API URL: {}", e)))?;

        let token = if config.bearer_token.is_empty() {
            None
        } else {
            Some(config.bearer_token.clone())
        };

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| FleetError::internal(format!("invalid path '{}': {}", path, e)))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(&self, response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(FleetError::upstream(
            SERVICE,
            format!("{} returned status {}", context, status),
        ))
    }

    /// Usage by node name from the metrics API. A missing or failing
    /// metrics API degrades to capacity-only nodes rather than an error.
    async fn node_usage(&self) -> HashMap<String, (f64, u64)> {
        let url = match self.url("apis/metrics.k8s.io/v1beta1/nodes") {
            Ok(url) => url,
            Err(_) => return HashMap::new(),
        };
        let response = match self.request(self.client.get(url)).send().await {
            Ok(r) if r.status().is_success() => r,
            _ => return HashMap::new(),
        };
        let payload: NodeMetricsList = match response.json().await {
            Ok(p) => p,
            Err(_) => return HashMap::new(),
        };

        payload
            .items
            .into_iter()
            .map(|item| {
                let cpu = item
                    .usage
                    .get("cpu")
                    .map(|q| parse_cpu(q))
                    .unwrap_or(0.0);
                let memory = item
                    .usage
                    .get("memory")
                    .map(|q| parse_memory(q))
                    .unwrap_or(0);
                (item.metadata.name, (cpu, memory))
            })
            .collect()
    }

    /// Pod counts by node name from one cluster-wide pod listing. A
    /// failing listing degrades to zero counts rather than an error.
    async fn pod_counts(&self) -> HashMap<String, u32> {
        let url = match self.url("api/v1/pods") {
            Ok(url) => url,
            Err(_) => return HashMap::new(),
        };
        let response = match self.request(self.client.get(url)).send().await {
            Ok(r) if r.status().is_success() => r,
            _ => return HashMap::new(),
        };
        let payload: PodList = match response.json().await {
            Ok(p) => p,
            Err(_) => return HashMap::new(),
        };

        let mut counts: HashMap<String, u32> = HashMap::new();
        for pod in payload.items {
            if let Some(node) = pod.spec.node_name {
                *counts.entry(node).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Node filesystem usage in bytes from the kubelet stats summary,
    /// proxied through the API server. Missing stats degrade to zero.
    async fn disk_usage(&self, node: &str) -> u64 {
        let url = match self.url(&format!("api/v1/nodes/{}/proxy/stats/summary", node)) {
            Ok(url) => url,
            Err(_) => return 0,
        };
        let response = match self.request(self.client.get(url)).send().await {
            Ok(r) if r.status().is_success() => r,
            _ => return 0,
        };
        let payload: StatsSummary = match response.json().await {
            Ok(p) => p,
            Err(_) => return 0,
        };
        payload.node.fs.and_then(|fs| fs.used_bytes).unwrap_or(0)
    }
}

#[async_trait]
impl ControlPlane for ControlPlaneClient {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let url = self.url("api/v1/nodes")?;
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        let response = self.check(response, "list nodes").await?;
        let payload: NodeList = response
            .json()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;

        let usage = self.node_usage().await;
        let pods = self.pod_counts().await;
        let mut nodes = Vec::with_capacity(payload.items.len());
        for item in payload.items {
            let disk_used = self.disk_usage(&item.metadata.name).await;
            nodes.push(node_from_payload(item, &usage, &pods, disk_used));
        }
        Ok(nodes)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let url = self.url(&format!("api/v1/nodes/{}", name))?;
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::not_found("node", name));
        }
        let response = self.check(response, "get node").await?;
        let payload: NodePayload = response
            .json()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;

        let usage = self.node_usage().await;
        let pods = self.pod_counts().await;
        let disk_used = self.disk_usage(name).await;
        Ok(node_from_payload(payload, &usage, &pods, disk_used))
    }

    async fn set_schedulable(&self, name: &str, schedulable: bool) -> Result<()> {
        let url = self.url(&format!("api/v1/nodes/{}", name))?;
        let patch = serde_json::json!({"spec": {"unschedulable": !schedulable}});
        let response = self
            .request(self.client.patch(url))
            .header(header::CONTENT_TYPE, "application/merge-patch+json")
            .body(patch.to_string())
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::not_found("node", name));
        }
        self.check(response, "patch node").await?;
        Ok(())
    }

    async fn list_pods(&self, node: &str) -> Result<Vec<PodRef>> {
        let mut url = self.url("api/v1/pods")?;
        url.query_pairs_mut()
            .append_pair("fieldSelector", &format!("spec.nodeName={}", node));
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        let response = self.check(response, "list pods").await?;
        let payload: PodList = response
            .json()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;

        Ok(payload
            .items
            .into_iter()
            .map(|pod| {
                let daemon_set = pod
                    .metadata
                    .owner_references
                    .iter()
                    .any(|owner| owner.kind == "DaemonSet");
                PodRef {
                    name: pod.metadata.name,
                    namespace: pod.metadata.namespace.unwrap_or_else(|| "default".into()),
                    daemon_set,
                }
            })
            .collect())
    }

    async fn evict_pod(&self, namespace: &str, name: &str, grace_secs: u64) -> Result<()> {
        let url = self.url(&format!(
            "api/v1/namespaces/{}/pods/{}/eviction",
            namespace, name
        ))?;
        let body = serde_json::json!({
            "apiVersion": "policy/v1",
            "kind": "Eviction",
            "metadata": {"name": name, "namespace": namespace},
            "deleteOptions": {"gracePeriodSeconds": grace_secs}
        });
        let response = self
            .request(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            // Pod already gone, eviction goal reached
            return Ok(());
        }
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FleetError::Busy(format!(
                "eviction of {}/{} blocked by disruption budget",
                namespace, name
            )));
        }
        self.check(response, "evict pod").await?;
        Ok(())
    }

    async fn force_delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut url = self.url(&format!("api/v1/namespaces/{}/pods/{}", namespace, name))?;
        url.query_pairs_mut().append_pair("gracePeriodSeconds", "0");
        let response = self
            .request(self.client.delete(url))
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.check(response, "force delete pod").await?;
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        let url = self.url(&format!("api/v1/nodes/{}", name))?;
        let response = self
            .request(self.client.delete(url))
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::not_found("node", name));
        }
        self.check(response, "delete node").await?;
        Ok(())
    }
}

/// Parse a CPU quantity like "250m" or "2" into cores.
fn parse_cpu(quantity: &str) -> f64 {
    if let Some(millis) = quantity.strip_suffix('m') {
        return millis.parse::<f64>().unwrap_or(0.0) / 1000.0;
    }
    if let Some(nanos) = quantity.strip_suffix('n') {
        return nanos.parse::<f64>().unwrap_or(0.0) / 1_000_000_000.0;
    }
    quantity.parse::<f64>().unwrap_or(0.0)
}

/// Parse a memory quantity like "1024Ki", "512Mi", "4Gi" or plain bytes.
fn parse_memory(quantity: &str) -> u64 {
    let units: [(&str, u64); 4] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
    ];
    for (suffix, multiplier) in units {
        if let Some(value) = quantity.strip_suffix(suffix) {
            return value
                .parse::<f64>()
                .map(|v| (v * multiplier as f64) as u64)
                .unwrap_or(0);
        }
    }
    quantity.parse::<u64>().unwrap_or(0)
}

fn node_from_payload(
    payload: NodePayload,
    usage: &HashMap<String, (f64, u64)>,
    pods: &HashMap<String, u32>,
    disk_usage_bytes: u64,
) -> Node {
    let name = payload.metadata.name.clone();
    let role = if payload.metadata.labels.contains_key(CONTROL_PLANE_LABEL) {
        NodeRole::ControlPlane
    } else {
        NodeRole::Worker
    };

    let conditions: Vec<NodeCondition> = payload
        .status
        .conditions
        .iter()
        .map(|c| NodeCondition {
            condition_type: c.kind.clone(),
            status: c.status.clone(),
            message: c.message.clone().unwrap_or_default(),
        })
        .collect();
    let ready = payload
        .status
        .conditions
        .iter()
        .any(|c| c.kind == "Ready" && c.status == "True");

    let cpu_capacity = payload
        .status
        .capacity
        .get("cpu")
        .map(|q| parse_cpu(q))
        .unwrap_or(0.0);
    let memory_capacity = payload
        .status
        .capacity
        .get("memory")
        .map(|q| parse_memory(q))
        .unwrap_or(0);
    let disk_capacity = payload
        .status
        .capacity
        .get("ephemeral-storage")
        .map(|q| parse_memory(q))
        .unwrap_or(0);
    let pod_capacity = payload
        .status
        .capacity
        .get("pods")
        .and_then(|q| q.parse::<u32>().ok())
        .unwrap_or(0);

    let (cpu_usage, memory_usage) = usage.get(&name).copied().unwrap_or((0.0, 0));

    let mut internal_ip = None;
    let mut external_ip = None;
    for addr in &payload.status.addresses {
        match addr.kind.as_str() {
            "InternalIP" if internal_ip.is_none() => internal_ip = Some(addr.address.clone()),
            "ExternalIP" if external_ip.is_none() => external_ip = Some(addr.address.clone()),
            _ => {}
        }
    }

    let created_at = payload
        .metadata
        .creation_timestamp
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| Utc::now().timestamp());

    let pod_count = pods.get(&name).copied().unwrap_or(0);

    // Kubelet heartbeat rides on the Ready condition
    let last_heartbeat = payload
        .status
        .conditions
        .iter()
        .find(|c| c.kind == "Ready")
        .and_then(|c| c.last_heartbeat_time.as_deref())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(created_at);

    Node {
        name,
        role,
        ready,
        schedulable: !payload.spec.unschedulable,
        cpu_capacity_cores: cpu_capacity,
        cpu_usage_cores: cpu_usage,
        memory_capacity_bytes: memory_capacity,
        memory_usage_bytes: memory_usage,
        disk_capacity_bytes: disk_capacity,
        disk_usage_bytes,
        pod_count,
        pod_capacity,
        internal_ip,
        external_ip,
        instance_type: payload
            .metadata
            .labels
            .get("node.kubernetes.io/instance-type")
            .cloned(),
        datacenter: payload
            .metadata
            .labels
            .get("topology.kubernetes.io/zone")
            .cloned(),
        monthly_price: None,
        conditions,
        created_at,
        last_heartbeat,
    }
}

// Kubernetes wire payloads, reduced to the fields we read

#[derive(Debug, Deserialize)]
struct NodeList {
    items: Vec<NodePayload>,
}

#[derive(Debug, Deserialize)]
struct NodePayload {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: NodeSpec,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    creation_timestamp: Option<String>,
    #[serde(default)]
    owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Deserialize)]
struct OwnerReference {
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct NodeSpec {
    #[serde(default)]
    unschedulable: bool,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    capacity: HashMap<String, String>,
    #[serde(default)]
    conditions: Vec<ConditionPayload>,
    #[serde(default)]
    addresses: Vec<AddressPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionPayload {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    last_heartbeat_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddressPayload {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct PodList {
    items: Vec<PodPayload>,
}

#[derive(Debug, Deserialize)]
struct PodPayload {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    node_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatsSummary {
    node: NodeStats,
}

#[derive(Debug, Deserialize)]
struct NodeStats {
    #[serde(default)]
    fs: Option<FsStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FsStats {
    #[serde(default)]
    used_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct NodeMetricsList {
    items: Vec<NodeMetricsPayload>,
}

#[derive(Debug, Deserialize)]
struct NodeMetricsPayload {
    metadata: ObjectMeta,
    #[serde(default)]
    usage: HashMap<String, String>,
}
