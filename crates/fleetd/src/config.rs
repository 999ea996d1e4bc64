//! Daemon configuration

use anyhow::Result;
use fleet_lib::OrchestratorConfig;
use serde::Deserialize;

/// Top-level fleetd configuration: API surface plus the orchestrator core
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// API server port for the operator endpoints, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(flatten)]
    pub orchestrator: OrchestratorConfig,
}

fn default_api_port() -> u16 {
    8080
}

impl DaemonConfig {
    /// Load configuration from the optional config file and the
    /// environment. Environment keys use a `FLEET_` prefix with `__`
    /// separating nested fields, e.g. `FLEET_PROVIDER__API_TOKEN`.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("/etc/fleetd/config").required(false))
            .add_source(
                config::Environment::with_prefix("FLEET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_in() {
        let config: DaemonConfig = serde_json::from_value(serde_json::json!({
            "provider": {"api_token": "token"},
            "control_plane": {"api_url": "https://cp.example:6443"}
        }))
        .unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.orchestrator.cluster_name, "fleet");
        assert!(config.orchestrator.validate().is_ok());
    }
}
