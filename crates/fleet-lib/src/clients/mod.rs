//! Typed wrappers over the three upstream HTTP APIs
//!
//! Each upstream is a trait so tests can substitute scripted mocks;
//! the reqwest implementations live in the sibling modules.

pub mod cloud;
pub mod control_plane;
pub mod registry;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Node;

pub use cloud::CloudApiClient;
pub use control_plane::ControlPlaneClient;
pub use registry::RegistryClient;

/// Request to create one cloud instance
#[derive(Debug, Clone, Serialize)]
pub struct ServerSpec {
    pub name: String,
    pub server_type: String,
    pub image: String,
    pub datacenter: String,
    pub ssh_keys: Vec<String>,
    pub labels: HashMap<String, String>,
    /// cloud-init payload executed on first boot
    pub user_data: String,
}

/// One compute instance as reported by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudServer {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub server_type: String,
    pub datacenter: String,
    pub monthly_price: Option<f64>,
    pub created_at: Option<i64>,
}

/// Provider instance type with pricing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerType {
    pub name: String,
    pub cores: u32,
    pub memory_gb: f64,
    pub disk_gb: u32,
    pub monthly_price: Option<f64>,
}

/// Power actions delegated to the provider; these never touch
/// Kubernetes-level node state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Reboot,
    PowerOff,
    PowerOn,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Reboot => "reboot",
            PowerAction::PowerOff => "poweroff",
            PowerAction::PowerOn => "poweron",
        }
    }
}

/// A pod scheduled on a node, as needed for drain decisions
#[derive(Debug, Clone)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    /// DaemonSet-owned pods are skipped during drain
    pub daemon_set: bool,
}

/// Manifest reference resolved from a tag
#[derive(Debug, Clone)]
pub struct ManifestRef {
    pub digest: String,
    pub size_bytes: u64,
}

/// Compute provider API
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create_server(&self, spec: &ServerSpec) -> Result<CloudServer>;
    async fn get_server(&self, id: u64) -> Result<CloudServer>;
    async fn delete_server(&self, id: u64) -> Result<()>;
    async fn power_action(&self, id: u64, action: PowerAction) -> Result<()>;
    /// List servers carrying the given label selector
    async fn list_servers(&self, label_selector: &str) -> Result<Vec<CloudServer>>;
    async fn list_server_types(&self) -> Result<Vec<ServerType>>;
}

/// Cluster control-plane API
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// One consistent snapshot of all nodes including resource usage
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    async fn get_node(&self, name: &str) -> Result<Node>;
    async fn set_schedulable(&self, name: &str, schedulable: bool) -> Result<()>;
    async fn list_pods(&self, node: &str) -> Result<Vec<PodRef>>;
    async fn evict_pod(&self, namespace: &str, name: &str, grace_secs: u64) -> Result<()>;
    async fn force_delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
    async fn delete_node(&self, name: &str) -> Result<()>;
}

/// Container registry API
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn list_repositories(&self) -> Result<Vec<String>>;
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;
    async fn tag_manifest(&self, repository: &str, tag: &str) -> Result<ManifestRef>;
    async fn delete_manifest(&self, repository: &str, digest: &str) -> Result<()>;
}
