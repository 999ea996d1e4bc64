//! Core data models for the fleet orchestrator

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Role of a cluster member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

/// One observed node condition as reported by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCondition {
    pub condition_type: String,
    pub status: String,
    pub message: String,
}

/// One cluster member and its last observed state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub role: NodeRole,
    pub ready: bool,
    pub schedulable: bool,
    pub cpu_capacity_cores: f64,
    pub cpu_usage_cores: f64,
    pub memory_capacity_bytes: u64,
    pub memory_usage_bytes: u64,
    pub disk_capacity_bytes: u64,
    pub disk_usage_bytes: u64,
    pub pod_count: u32,
    pub pod_capacity: u32,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub instance_type: Option<String>,
    pub datacenter: Option<String>,
    pub monthly_price: Option<f64>,
    pub conditions: Vec<NodeCondition>,
    /// Unix timestamp of node object creation
    pub created_at: i64,
    /// Unix timestamp of the last heartbeat from the node
    pub last_heartbeat: i64,
}

impl Node {
    pub fn cpu_percent(&self) -> f64 {
        if self.cpu_capacity_cores <= 0.0 {
            return 0.0;
        }
        self.cpu_usage_cores / self.cpu_capacity_cores * 100.0
    }

    pub fn memory_percent(&self) -> f64 {
        if self.memory_capacity_bytes == 0 {
            return 0.0;
        }
        self.memory_usage_bytes as f64 / self.memory_capacity_bytes as f64 * 100.0
    }

    pub fn disk_percent(&self) -> f64 {
        if self.disk_capacity_bytes == 0 {
            return 0.0;
        }
        self.disk_usage_bytes as f64 / self.disk_capacity_bytes as f64 * 100.0
    }

    /// Seconds since the node last reported a heartbeat
    pub fn heartbeat_age_secs(&self, now: i64) -> f64 {
        (now - self.last_heartbeat).max(0) as f64
    }

    pub fn is_worker(&self) -> bool {
        self.role == NodeRole::Worker
    }
}

/// Monitored metric kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    Heartbeat,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Cpu => write!(f, "cpu"),
            MetricKind::Memory => write!(f, "memory"),
            MetricKind::Disk => write!(f, "disk"),
            MetricKind::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// Classification of a metric sample against its thresholds.
/// Ordered so that the worst status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Healthy,
    Warning,
    Critical,
}

/// Warning/critical threshold pair for one metric kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    /// Classification is a pure function of (value, thresholds); the status
    /// is never stored apart from the value that produced it.
    pub fn classify(&self, value: f64) -> MetricStatus {
        if value >= self.critical {
            MetricStatus::Critical
        } else if value >= self.warning {
            MetricStatus::Warning
        } else {
            MetricStatus::Healthy
        }
    }
}

/// A named, timestamped metric sample scoped to one node or to the
/// cluster as a whole (`node: None`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetric {
    pub kind: MetricKind,
    pub node: Option<String>,
    pub value: f64,
    pub status: MetricStatus,
    pub timestamp: i64,
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A threshold breach or missed heartbeat for one (node, metric) pair.
/// At most one open alert exists per pair; repeat breaches refresh
/// `last_seen` instead of creating duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub node: String,
    pub metric: MetricKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub value: f64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub resolved_at: Option<i64>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Per-node aggregated status line for the summary view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub role: NodeRole,
    pub ready: bool,
    pub schedulable: bool,
    pub status: MetricStatus,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub pod_count: u32,
    pub pod_capacity: u32,
}

/// Cluster-wide aggregates computed over worker nodes from one
/// monitor poll cycle
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

/// One autoscaling rule; read-only to the autoscaler during evaluation,
/// mutated only through explicit operator updates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingPolicy {
    pub name: String,
    pub enabled: bool,
    pub min_nodes: u32,
    pub max_nodes: u32,
    /// Selects cluster CPU utilization as the aggregate when set
    #[serde(rename = "targetCPUUtilization")]
    pub target_cpu_utilization: Option<f64>,
    /// Selects cluster memory utilization when set (and CPU is not)
    pub target_memory_utilization: Option<f64>,
    /// Falls back to pod-capacity utilization when neither target is set
    pub target_pod_utilization: Option<f64>,
    /// Fraction of the aggregate at or above which the policy scales up
    pub scale_up_threshold: f64,
    /// Fraction of the aggregate at or below which the policy scales down
    pub scale_down_threshold: f64,
    #[serde(rename = "scaleUpCooldown")]
    pub scale_up_cooldown_secs: u64,
    #[serde(rename = "scaleDownCooldown")]
    pub scale_down_cooldown_secs: u64,
}

impl AutoscalingPolicy {
    /// Default CPU-driven policy used when no policies are configured
    pub fn default_cpu(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            min_nodes: 1,
            max_nodes: 5,
            target_cpu_utilization: Some(0.7),
            target_memory_utilization: None,
            target_pod_utilization: None,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scale_up_cooldown_secs: 300,
            scale_down_cooldown_secs: 600,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FleetError::validation("policy name must not be empty"));
        }
        if self.min_nodes > self.max_nodes {
            return Err(FleetError::validation(format!(
                "minNodes ({}) must not exceed maxNodes ({})",
                self.min_nodes, self.max_nodes
            )));
        }
        for (field, value) in [
            ("scaleUpThreshold", self.scale_up_threshold),
            ("scaleDownThreshold", self.scale_down_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FleetError::validation(format!(
                    "{} must be a fraction between 0 and 1, got {}",
                    field, value
                )));
            }
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(FleetError::validation(
                "scaleDownThreshold must be below scaleUpThreshold",
            ));
        }
        Ok(())
    }

    /// Pick the utilization fraction this policy reacts to
    pub fn aggregate(&self, metrics: &ClusterMetrics) -> f64 {
        if self.target_cpu_utilization.is_some() {
            metrics.cpu_percent / 100.0
        } else if self.target_memory_utilization.is_some() {
            metrics.memory_percent / 100.0
        } else {
            metrics.pod_percent / 100.0
        }
    }
}

/// Partial policy mutation accepted from operators; only set fields
/// are merged into the named policy
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUpdate {
    pub enabled: Option<bool>,
    pub min_nodes: Option<u32>,
    pub max_nodes: Option<u32>,
    #[serde(rename = "targetCPUUtilization")]
    pub target_cpu_utilization: Option<f64>,
    pub target_memory_utilization: Option<f64>,
    pub target_pod_utilization: Option<f64>,
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    #[serde(rename = "scaleUpCooldown")]
    pub scale_up_cooldown_secs: Option<u64>,
    #[serde(rename = "scaleDownCooldown")]
    pub scale_down_cooldown_secs: Option<u64>,
}

impl PolicyUpdate {
    /// Merge set fields into `policy`; validation runs on the result
    pub fn apply(&self, policy: &mut AutoscalingPolicy) {
        if let Some(v) = self.enabled {
            policy.enabled = v;
        }
        if let Some(v) = self.min_nodes {
            policy.min_nodes = v;
        }
        if let Some(v) = self.max_nodes {
            policy.max_nodes = v;
        }
        if let Some(v) = self.target_cpu_utilization {
            policy.target_cpu_utilization = Some(v);
        }
        if let Some(v) = self.target_memory_utilization {
            policy.target_memory_utilization = Some(v);
        }
        if let Some(v) = self.target_pod_utilization {
            policy.target_pod_utilization = Some(v);
        }
        if let Some(v) = self.scale_up_threshold {
            policy.scale_up_threshold = v;
        }
        if let Some(v) = self.scale_down_threshold {
            policy.scale_down_threshold = v;
        }
        if let Some(v) = self.scale_up_cooldown_secs {
            policy.scale_up_cooldown_secs = v;
        }
        if let Some(v) = self.scale_down_cooldown_secs {
            policy.scale_down_cooldown_secs = v;
        }
    }
}

/// Direction of a scaling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Up,
    Down,
}

impl std::fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleDirection::Up => write!(f, "up"),
            ScaleDirection::Down => write!(f, "down"),
        }
    }
}

/// Immutable record of one autoscaler decision; history is append-only
/// and drives both the cooldown calculation and audit display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub policy: String,
    pub direction: ScaleDirection,
    pub metrics: ClusterMetrics,
    pub node_count_after: u32,
    pub node: Option<String>,
    pub timestamp: i64,
}

/// A container repository with its tags, sourced live from the registry
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
