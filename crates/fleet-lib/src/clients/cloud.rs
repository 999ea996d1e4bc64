//! Compute provider API client
//!
//! Thin typed wrapper over the provider's HTTP API: server CRUD, power
//! actions, label-filtered listing and server types with pricing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{CloudProvider, CloudServer, PowerAction, ServerSpec, ServerType};
use crate::config::ProviderConfig;
use crate::error::{FleetError, Result};

const SERVICE: &str = "provider";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed provider client
pub struct CloudApiClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl CloudApiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FleetError::configuration(format!("provider HTTP client: {}", e)))?;

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| FleetError::configuration(format!("provider base URL: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| FleetError::internal(format!("invalid path '{}': {}", path, e)))
    }

    async fn check(&self, response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // Raw upstream bodies are never surfaced to callers
        Err(FleetError::upstream(
            SERVICE,
            format!("{} returned status {}", context, status),
        ))
    }
}

#[async_trait]
impl CloudProvider for CloudApiClient {
    async fn create_server(&self, spec: &ServerSpec) -> Result<CloudServer> {
        let url = self.url("servers")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(spec)
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;

        let response = self.check(response, "create server").await?;
        let payload: ServerEnvelope = response
            .json()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        Ok(payload.server.into())
    }

    async fn get_server(&self, id: u64) -> Result<CloudServer> {
        let url = self.url(&format!("servers/{}", id))?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::not_found("server", id.to_string()));
        }
        let response = self.check(response, "get server").await?;
        let payload: ServerEnvelope = response
            .json()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        Ok(payload.server.into())
    }

    async fn delete_server(&self, id: u64) -> Result<()> {
        let url = self.url(&format!("servers/{}", id))?;
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::not_found("server", id.to_string()));
        }
        self.check(response, "delete server").await?;
        Ok(())
    }

    async fn power_action(&self, id: u64, action: PowerAction) -> Result<()> {
        let url = self.url(&format!("servers/{}/actions/{}", id, action.as_str()))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::not_found("server", id.to_string()));
        }
        self.check(response, "power action").await?;
        Ok(())
    }

    async fn list_servers(&self, label_selector: &str) -> Result<Vec<CloudServer>> {
        let mut url = self.url("servers")?;
        url.query_pairs_mut()
            .append_pair("label_selector", label_selector);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;

        let response = self.check(response, "list servers").await?;
        let payload: ServerListEnvelope = response
            .json()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        Ok(payload.servers.into_iter().map(Into::into).collect())
    }

    async fn list_server_types(&self) -> Result<Vec<ServerType>> {
        let url = self.url("server_types")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;

        let response = self.check(response, "list server types").await?;
        let payload: ServerTypeListEnvelope = response
            .json()
            .await
            .map_err(|e| FleetError::upstream(SERVICE, e))?;
        Ok(payload.server_types.into_iter().map(Into::into).collect())
    }
}

// Provider wire payloads

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: ServerPayload,
}

#[derive(Debug, Deserialize)]
struct ServerListEnvelope {
    servers: Vec<ServerPayload>,
}

#[derive(Debug, Deserialize)]
struct ServerPayload {
    id: u64,
    name: String,
    status: String,
    #[serde(default)]
    public_net: Option<PublicNet>,
    #[serde(default)]
    private_net: Vec<PrivateNet>,
    server_type: NamedRef,
    datacenter: NamedRef,
    #[serde(default)]
    created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublicNet {
    #[serde(default)]
    ipv4: Option<Ipv4Net>,
}

#[derive(Debug, Deserialize)]
struct Ipv4Net {
    ip: String,
}

#[derive(Debug, Deserialize)]
struct PrivateNet {
    ip: String,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

impl From<ServerPayload> for CloudServer {
    fn from(payload: ServerPayload) -> Self {
        let created_at = payload
            .created
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());
        CloudServer {
            id: payload.id,
            name: payload.name,
            status: payload.status,
            public_ip: payload.public_net.and_then(|n| n.ipv4).map(|v| v.ip),
            private_ip: payload.private_net.into_iter().next().map(|n| n.ip),
            server_type: payload.server_type.name,
            datacenter: payload.datacenter.name,
            monthly_price: None,
            created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerTypeListEnvelope {
    server_types: Vec<ServerTypePayload>,
}

#[derive(Debug, Deserialize)]
struct ServerTypePayload {
    name: String,
    cores: u32,
    memory: f64,
    disk: u32,
    #[serde(default)]
    prices: Vec<PricePayload>,
}

#[derive(Debug, Deserialize)]
struct PricePayload {
    price_monthly: PriceAmount,
}

#[derive(Debug, Deserialize)]
struct PriceAmount {
    gross: String,
}

impl From<ServerTypePayload> for ServerType {
    fn from(payload: ServerTypePayload) -> Self {
        let monthly_price = payload
            .prices
            .first()
            .and_then(|p| p.price_monthly.gross.parse::<f64>().ok());
        ServerType {
            name: payload.name,
            cores: payload.cores,
            memory_gb: payload.memory,
            disk_gb: payload.disk,
            monthly_price,
        }
    }
}

/// Label selector for all servers managed for one cluster
pub fn cluster_selector(cluster_name: &str) -> String {
    format!("cluster={}", cluster_name)
}
