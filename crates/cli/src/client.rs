//! API client for communicating with the fleet daemon

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// HTTP client for the fleetd REST API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a PATCH request with JSON body
    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .patch(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a DELETE request
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub role: String,
    pub ready: bool,
    pub schedulable: bool,
    pub status: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub pod_count: u32,
    pub pod_capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetric {
    pub kind: String,
    pub node: Option<String>,
    pub value: f64,
    pub status: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub worker_count: u32,
    pub ready_workers: u32,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub pod_percent: f64,
    pub total_pods: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub node: String,
    pub metric: String,
    pub severity: String,
    pub message: String,
    pub value: f64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub resolved_at: Option<i64>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingPolicy {
    pub name: String,
    pub enabled: bool,
    pub min_nodes: u32,
    pub max_nodes: u32,
    #[serde(rename = "targetCPUUtilization")]
    pub target_cpu_utilization: Option<f64>,
    pub target_memory_utilization: Option<f64>,
    pub target_pod_utilization: Option<f64>,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    #[serde(rename = "scaleUpCooldown")]
    pub scale_up_cooldown_secs: u64,
    #[serde(rename = "scaleDownCooldown")]
    pub scale_down_cooldown_secs: u64,
}

/// Partial policy update; unset fields are left unchanged server-side
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_nodes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_nodes: Option<u32>,
    #[serde(rename = "targetCPUUtilization", skip_serializing_if = "Option::is_none")]
    pub target_cpu_utilization: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_memory_utilization: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_pod_utilization: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_up_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_down_threshold: Option<f64>,
    #[serde(rename = "scaleUpCooldown", skip_serializing_if = "Option::is_none")]
    pub scale_up_cooldown_secs: Option<u64>,
    #[serde(rename = "scaleDownCooldown", skip_serializing_if = "Option::is_none")]
    pub scale_down_cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub policy: String,
    pub direction: String,
    pub metrics: ClusterMetrics,
    pub node_count_after: u32,
    pub node: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub tags: Vec<ImageTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageTag {
    pub name: String,
    pub digest: String,
    pub size_bytes: u64,
    pub pushed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeActionRequest {
    pub action: String,
    pub node_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    pub action: String,
    pub node_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteImageResponse {
    pub success: bool,
    pub repository: String,
    pub tag: String,
}
