//! Orchestrator configuration
//!
//! All blocks carry serde defaults so a partially specified environment
//! still deserializes; `validate()` enforces what is actually required
//! and fails fast before any module is constructed.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{FleetError, Result};
use crate::models::{AutoscalingPolicy, Threshold};

/// Top-level orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Cluster name; also used as the label value on cloud instances
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Passphrase for kubeconfig encryption at rest. Absence is a
    /// non-fatal warning; material is then kept in memory only.
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Directory for encrypted state (kubeconfig material)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub autoscaler: AutoscalerConfig,

    #[serde(default)]
    pub registry: Option<RegistryConfig>,

    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            provider: ProviderConfig::default(),
            control_plane: ControlPlaneConfig::default(),
            encryption_key: None,
            state_dir: default_state_dir(),
            monitoring: MonitoringConfig::default(),
            autoscaler: AutoscalerConfig::default(),
            registry: None,
            provisioning: ProvisioningConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Fail fast on missing credentials or nonsensical values
    pub fn validate(&self) -> Result<()> {
        if self.provider.api_token.trim().is_empty() {
            return Err(FleetError::configuration(
                "provider API token is required (provider.api_token)",
            ));
        }
        if self.control_plane.api_url.trim().is_empty() {
            return Err(FleetError::configuration(
                "control plane API URL is required (control_plane.api_url)",
            ));
        }
        if self.monitoring.check_interval_secs == 0 {
            return Err(FleetError::configuration(
                "monitoring.check_interval_secs must be greater than zero",
            ));
        }
        for policy in &self.autoscaler.policies {
            policy
                .validate()
                .map_err(|e| FleetError::configuration(format!("policy '{}': {}", policy.name, e)))?;
        }
        if let Some(registry) = &self.registry {
            if registry.enabled && registry.url.trim().is_empty() {
                return Err(FleetError::configuration(
                    "registry.url is required when the registry is enabled",
                ));
            }
        }
        Ok(())
    }
}

/// Cloud compute provider access and instance defaults
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// API token; required
    #[serde(default)]
    pub api_token: String,

    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// Instance type for provisioned workers
    #[serde(default = "default_server_type")]
    pub server_type: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_datacenter")]
    pub datacenter: String,

    /// SSH key names registered with the provider
    #[serde(default)]
    pub ssh_keys: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            base_url: default_provider_url(),
            server_type: default_server_type(),
            image: default_image(),
            datacenter: default_datacenter(),
            ssh_keys: Vec::new(),
        }
    }
}

/// Cluster control-plane access
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlPlaneConfig {
    /// Kubernetes-compatible API endpoint
    #[serde(default)]
    pub api_url: String,

    /// Bearer token for API requests
    #[serde(default)]
    pub bearer_token: String,

    /// Join token handed to new nodes at provisioning time
    #[serde(default)]
    pub join_token: String,
}

/// Health monitoring block
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_metrics_retention")]
    pub metrics_retention_hours: u64,

    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: default_check_interval(),
            metrics_retention_hours: default_metrics_retention(),
            thresholds: Thresholds::default(),
        }
    }
}

/// Per-metric warning/critical pairs. CPU, memory and disk are
/// percentages; heartbeat is an age in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_cpu_threshold")]
    pub cpu: Threshold,
    #[serde(default = "default_memory_threshold")]
    pub memory: Threshold,
    #[serde(default = "default_disk_threshold")]
    pub disk: Threshold,
    #[serde(default = "default_heartbeat_threshold")]
    pub heartbeat: Threshold,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: default_cpu_threshold(),
            memory: default_memory_threshold(),
            disk: default_disk_threshold(),
            heartbeat: default_heartbeat_threshold(),
        }
    }
}

/// Autoscaler block
#[derive(Debug, Clone, Deserialize)]
pub struct AutoscalerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_evaluate_interval")]
    pub evaluate_interval_secs: u64,

    /// Retained scaling-event history entries
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_policies")]
    pub policies: Vec<AutoscalingPolicy>,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluate_interval_secs: default_evaluate_interval(),
            history_limit: default_history_limit(),
            policies: default_policies(),
        }
    }
}

/// Container registry block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Provisioning and drain budgets
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProvisioningConfig {
    /// Overall budget for a new node to join and become ready
    #[serde(default = "default_provisioning_timeout")]
    pub timeout_secs: u64,

    /// Interval between readiness checks while waiting
    #[serde(default = "default_provisioning_poll")]
    pub poll_interval_secs: u64,

    /// Grace period handed to pod evictions during drain
    #[serde(default = "default_drain_grace")]
    pub drain_grace_secs: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_provisioning_timeout(),
            poll_interval_secs: default_provisioning_poll(),
            drain_grace_secs: default_drain_grace(),
        }
    }
}

fn default_cluster_name() -> String {
    "fleet".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleetd")
}

fn default_provider_url() -> String {
    "https://api.hetzner.cloud/v1".to_string()
}

fn default_server_type() -> String {
    "cx22".to_string()
}

fn default_image() -> String {
    "ubuntu-22.04".to_string()
}

fn default_datacenter() -> String {
    "fsn1-dc14".to_string()
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    30
}

fn default_metrics_retention() -> u64 {
    24
}

fn default_cpu_threshold() -> Threshold {
    Threshold::new(70.0, 90.0)
}

fn default_memory_threshold() -> Threshold {
    Threshold::new(75.0, 90.0)
}

fn default_disk_threshold() -> Threshold {
    Threshold::new(80.0, 95.0)
}

fn default_heartbeat_threshold() -> Threshold {
    Threshold::new(60.0, 300.0)
}

fn default_evaluate_interval() -> u64 {
    60
}

fn default_history_limit() -> usize {
    500
}

fn default_policies() -> Vec<AutoscalingPolicy> {
    vec![AutoscalingPolicy::default_cpu("default")]
}

fn default_provisioning_timeout() -> u64 {
    600
}

fn default_provisioning_poll() -> u64 {
    10
}

fn default_drain_grace() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.provider.api_token = "token".into();
        config.control_plane.api_url = "https://10.0.0.1:6443".into();
        config
    }

    #[test]
    fn test_missing_provider_token_rejected() {
        let config = OrchestratorConfig::default();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION");
        assert!(err.to_string().contains("api_token"));
    }

    #[test]
    fn test_minimal_config_valid() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let mut config = minimal_config();
        config.autoscaler.policies[0].min_nodes = 99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_registry_requires_url() {
        let mut config = minimal_config();
        config.registry = Some(RegistryConfig {
            enabled: true,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.monitoring.check_interval_secs, 30);
        assert_eq!(config.monitoring.metrics_retention_hours, 24);
        assert_eq!(config.provisioning.timeout_secs, 600);
        assert_eq!(config.autoscaler.policies.len(), 1);
        assert_eq!(config.autoscaler.policies[0].name, "default");
    }
}
