//! Orchestrator wiring and lifecycle
//!
//! Builds the module graph from a validated configuration, starts the
//! background loops and owns the shutdown channel. Construction is
//! explicit: callers hold the `Orchestrator` they built, there is no
//! process-global instance.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::autoscaler::Autoscaler;
use crate::clients::{
    CloudApiClient, CloudProvider, ControlPlane, ControlPlaneClient, RegistryApi, RegistryClient,
};
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::lifecycle::{NodeLifecycleManager, SecretStore};
use crate::monitor::HealthMonitor;
use crate::observability::{FleetMetrics, StructuredLogger};
use crate::registry::RegistryManager;

pub struct Orchestrator {
    config: OrchestratorConfig,
    health: HealthRegistry,
    monitor: Arc<HealthMonitor>,
    autoscaler: Arc<Autoscaler>,
    lifecycle: Arc<NodeLifecycleManager>,
    registry: Option<Arc<RegistryManager>>,
    logger: StructuredLogger,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build an orchestrator with HTTP clients for every upstream.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;

        let cloud: Arc<dyn CloudProvider> = Arc::new(CloudApiClient::new(&config.provider)?);
        let control_plane: Arc<dyn ControlPlane> =
            Arc::new(ControlPlaneClient::new(&config.control_plane)?);
        let registry: Option<Arc<dyn RegistryApi>> = match &config.registry {
            Some(rc) if rc.enabled => Some(Arc::new(RegistryClient::new(rc)?)),
            _ => None,
        };

        Self::with_clients(config, cloud, control_plane, registry)
    }

    /// Build an orchestrator on top of caller-supplied clients. This is
    /// the seam tests and embedders use to swap the upstreams out.
    pub fn with_clients(
        config: OrchestratorConfig,
        cloud: Arc<dyn CloudProvider>,
        control_plane: Arc<dyn ControlPlane>,
        registry: Option<Arc<dyn RegistryApi>>,
    ) -> Result<Self> {
        config.validate()?;

        let logger = StructuredLogger::new(&config.cluster_name);
        let metrics = FleetMetrics::new();
        let health = HealthRegistry::new();

        let monitor = Arc::new(HealthMonitor::new(
            control_plane.clone(),
            config.monitoring.clone(),
            logger.clone(),
            metrics.clone(),
        ));

        let secrets = SecretStore::new(config.encryption_key.as_deref(), &config.state_dir);
        let lifecycle = Arc::new(NodeLifecycleManager::new(
            cloud,
            control_plane,
            config.cluster_name.clone(),
            config.provider.clone(),
            config.control_plane.clone(),
            config.provisioning,
            secrets,
            logger.clone(),
            metrics.clone(),
        ));

        let autoscaler = Arc::new(Autoscaler::new(
            monitor.clone(),
            lifecycle.clone(),
            config.autoscaler.clone(),
            logger.clone(),
            metrics,
        ));

        let registry = registry.map(|api| Arc::new(RegistryManager::new(api)));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            health,
            monitor,
            autoscaler,
            lifecycle,
            registry,
            logger,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the enabled background loops and mark the orchestrator ready.
    pub async fn start(&self) {
        self.logger.log_startup(env!("CARGO_PKG_VERSION"));
        let mut tasks = self.tasks.lock().await;

        self.health.register(components::LIFECYCLE).await;

        if self.config.monitoring.enabled {
            self.health.register(components::MONITOR).await;
            tasks.push(tokio::spawn(self.monitor.clone().run(
                self.health.clone(),
                self.shutdown_tx.subscribe(),
            )));
        }

        if self.config.autoscaler.enabled {
            self.health.register(components::AUTOSCALER).await;
            tasks.push(tokio::spawn(self.autoscaler.clone().run(
                self.health.clone(),
                self.shutdown_tx.subscribe(),
            )));
        }

        if self.registry.is_some() {
            self.health.register(components::REGISTRY).await;
        }

        self.health.set_ready(true).await;
    }

    /// Signal every loop to stop and wait for them to finish.
    pub async fn shutdown(&self) {
        self.logger.log_shutdown("requested");
        self.health.set_ready(false).await;

        // Nothing to send to when no loop was started
        let _ = self.shutdown_tx.send(());

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn autoscaler(&self) -> &Arc<Autoscaler> {
        &self.autoscaler
    }

    pub fn lifecycle(&self) -> &Arc<NodeLifecycleManager> {
        &self.lifecycle
    }

    /// The registry manager, when a registry is configured and enabled.
    pub fn registry(&self) -> Option<&Arc<RegistryManager>> {
        self.registry.as_ref()
    }

    pub fn health_registry(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::{worker, MockCloud, MockControlPlane};
    use chrono::Utc;

    fn test_config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.provider.api_token = "token".into();
        config.control_plane.api_url = "https://cp.example:6443".into();
        config.state_dir = std::env::temp_dir();
        config
    }

    #[tokio::test]
    async fn test_with_clients_wires_modules() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "fleet-worker-a",
            40.0,
            Utc::now().timestamp() - 3600,
        )]));
        let orch = Orchestrator::with_clients(
            test_config(),
            Arc::new(MockCloud::default()),
            cp,
            None,
        )
        .unwrap();

        assert!(orch.registry().is_none());
        orch.monitor().poll_once().await.unwrap();
        assert_eq!(orch.monitor().node_summaries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.provider.api_token = String::new();

        let result = Orchestrator::with_clients(
            config,
            Arc::new(MockCloud::default()),
            Arc::new(MockControlPlane::default()),
            None,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let orch = Orchestrator::with_clients(
            test_config(),
            Arc::new(MockCloud::default()),
            Arc::new(MockControlPlane::default()),
            None,
        )
        .unwrap();

        orch.start().await;
        assert!(orch.health_registry().readiness().await.ready);

        orch.shutdown().await;
        assert!(!orch.health_registry().readiness().await.ready);
        assert!(orch.tasks.lock().await.is_empty());
    }
}
