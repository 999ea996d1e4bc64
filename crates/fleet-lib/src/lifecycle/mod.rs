//! Node lifecycle manager
//!
//! Provisions and decommissions worker nodes, cordons and drains them,
//! forwards power actions to the provider and reconciles provider
//! instances against the cluster inventory. Every mutating operation on
//! a node runs under that node's lock; concurrent operations on the same
//! node fail fast instead of queueing.

mod secrets;

pub use secrets::{SecretStore, StoredAt};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::clients::cloud::cluster_selector;
use crate::clients::{CloudProvider, CloudServer, ControlPlane, PowerAction, ServerSpec};
use crate::config::{ControlPlaneConfig, ProviderConfig, ProvisioningConfig};
use crate::error::{FleetError, Result};
use crate::models::Node;
use crate::observability::{FleetMetrics, StructuredLogger};

/// Holds one node's slot in the lock arena; dropping it releases the node.
struct NodeGuard {
    arena: Arc<DashMap<String, ()>>,
    node: String,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        self.arena.remove(&self.node);
    }
}

pub struct NodeLifecycleManager {
    cloud: Arc<dyn CloudProvider>,
    control_plane: Arc<dyn ControlPlane>,
    cluster_name: String,
    provider: ProviderConfig,
    control_plane_config: ControlPlaneConfig,
    provisioning: ProvisioningConfig,
    secrets: SecretStore,
    busy: Arc<DashMap<String, ()>>,
    logger: StructuredLogger,
    metrics: FleetMetrics,
}

impl NodeLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        control_plane: Arc<dyn ControlPlane>,
        cluster_name: impl Into<String>,
        provider: ProviderConfig,
        control_plane_config: ControlPlaneConfig,
        provisioning: ProvisioningConfig,
        secrets: SecretStore,
        logger: StructuredLogger,
        metrics: FleetMetrics,
    ) -> Self {
        Self {
            cloud,
            control_plane,
            cluster_name: cluster_name.into(),
            provider,
            control_plane_config,
            provisioning,
            secrets,
            busy: Arc::new(DashMap::new()),
            logger,
            metrics,
        }
    }

    /// Take the per-node lock or fail with Busy.
    fn acquire(&self, node: &str) -> Result<NodeGuard> {
        match self.busy.entry(node.to_string()) {
            Entry::Occupied(_) => Err(FleetError::Busy(format!(
                "another operation is already running on node {}",
                node
            ))),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(NodeGuard {
                    arena: Arc::clone(&self.busy),
                    node: node.to_string(),
                })
            }
        }
    }

    /// Whether a lifecycle operation currently holds the node's lock.
    pub fn is_busy(&self, node: &str) -> bool {
        self.busy.contains_key(node)
    }

    /// Create a provider instance, wait for it to join the cluster and
    /// report Ready, and return the joined node.
    ///
    /// On timeout the instance is left in place for the reconciliation
    /// pass to flag; it may still join late.
    pub async fn provision_node(&self) -> Result<Node> {
        let name = self.next_node_name();
        let _guard = self.acquire(&name)?;
        let started = Utc::now().timestamp();

        let spec = ServerSpec {
            name: name.clone(),
            server_type: self.provider.server_type.clone(),
            image: self.provider.image.clone(),
            datacenter: self.provider.datacenter.clone(),
            ssh_keys: self.provider.ssh_keys.clone(),
            labels: HashMap::from([
                ("cluster".to_string(), self.cluster_name.clone()),
                ("role".to_string(), "worker".to_string()),
            ]),
            user_data: self.join_user_data(&name),
        };

        info!(node = %name, server_type = %spec.server_type, "Provisioning node");
        let server = match self.cloud.create_server(&spec).await {
            Ok(server) => server,
            Err(e) => {
                self.metrics.inc_provisioning_failures();
                return Err(e);
            }
        };

        let node = match self.wait_for_ready(&name).await {
            Ok(node) => node,
            Err(e) => {
                self.metrics.inc_provisioning_failures();
                warn!(
                    node = %name,
                    server_id = server.id,
                    error = %e,
                    "Node did not become ready; instance left for reconciliation"
                );
                return Err(e);
            }
        };

        let duration = (Utc::now().timestamp() - started).max(0) as u64;
        self.logger.log_provisioned(&name, server.id, duration);

        // Credential persistence is best effort; the node is up either way
        if let Err(e) = self.persist_cluster_credentials() {
            warn!(error = %e, "Failed to persist cluster credentials");
        }

        Ok(node)
    }

    /// Drain a node, remove it from the cluster and delete its provider
    /// instance.
    pub async fn decommission_node(&self, name: &str) -> Result<()> {
        let _guard = self.acquire(name)?;

        info!(node = %name, "Decommissioning node");
        self.control_plane.set_schedulable(name, false).await?;
        self.drain_inner(name).await?;
        self.control_plane.delete_node(name).await?;

        let server_id = match self.find_server(name).await? {
            Some(server) => {
                self.cloud.delete_server(server.id).await?;
                Some(server.id)
            }
            None => {
                warn!(node = %name, "No provider instance found for node");
                None
            }
        };

        self.logger.log_decommissioned(name, server_id);
        Ok(())
    }

    /// Cordon a node and evict its pods, leaving the node in place.
    pub async fn drain(&self, name: &str) -> Result<()> {
        let _guard = self.acquire(name)?;
        self.control_plane.set_schedulable(name, false).await?;
        self.drain_inner(name).await
    }

    /// Mark a node unschedulable. Idempotent and lock-free.
    pub async fn cordon(&self, name: &str) -> Result<()> {
        self.control_plane.set_schedulable(name, false).await
    }

    /// Mark a node schedulable again. Idempotent and lock-free.
    pub async fn uncordon(&self, name: &str) -> Result<()> {
        self.control_plane.set_schedulable(name, true).await
    }

    /// Forward a power action to the provider. Cluster state is untouched;
    /// the monitor will observe the node going unready on its own.
    pub async fn power_action(&self, name: &str, action: PowerAction) -> Result<()> {
        let server = self
            .find_server(name)
            .await?
            .ok_or_else(|| FleetError::not_found("server", name))?;
        info!(node = %name, server_id = server.id, action = action.as_str(), "Power action");
        self.cloud.power_action(server.id, action).await
    }

    /// Flag provider instances that carry this cluster's label but have no
    /// matching cluster node and are older than the provisioning timeout.
    /// Flagged instances are reported, never deleted.
    pub async fn reconcile_orphans(&self) -> Result<Vec<String>> {
        let servers = self
            .cloud
            .list_servers(&cluster_selector(&self.cluster_name))
            .await?;
        let nodes = self.control_plane.list_nodes().await?;
        let node_names: std::collections::HashSet<&str> =
            nodes.iter().map(|n| n.name.as_str()).collect();

        let now = Utc::now().timestamp();
        let grace = self.provisioning.timeout_secs as i64;
        let orphans: Vec<String> = servers
            .into_iter()
            .filter(|s| !node_names.contains(s.name.as_str()))
            .filter(|s| {
                // Instances still inside the provisioning window may just
                // not have joined yet
                s.created_at.map(|c| now - c > grace).unwrap_or(true)
            })
            .map(|s| s.name)
            .collect();

        self.metrics.set_orphaned_instances(orphans.len() as i64);
        self.logger.log_orphans(&orphans);
        Ok(orphans)
    }

    /// Evict every pod on the node, ignoring daemon set pods. A pod whose
    /// eviction fails is force deleted so a drain cannot wedge on one pod.
    async fn drain_inner(&self, name: &str) -> Result<()> {
        let pods = self.control_plane.list_pods(name).await?;
        let grace = self.provisioning.drain_grace_secs;

        for pod in pods.iter().filter(|p| !p.daemon_set) {
            if let Err(e) = self
                .control_plane
                .evict_pod(&pod.namespace, &pod.name, grace)
                .await
            {
                warn!(
                    pod = %pod.name,
                    namespace = %pod.namespace,
                    error = %e,
                    "Eviction failed, force deleting pod"
                );
                self.control_plane
                    .force_delete_pod(&pod.namespace, &pod.name)
                    .await?;
            }
        }
        debug!(node = %name, pods = pods.len(), "Drain complete");
        Ok(())
    }

    /// Poll the control plane until the node exists and reports Ready, or
    /// the provisioning deadline passes.
    async fn wait_for_ready(&self, name: &str) -> Result<Node> {
        let deadline = Utc::now().timestamp() + self.provisioning.timeout_secs as i64;
        loop {
            match self.control_plane.get_node(name).await {
                Ok(node) if node.ready => return Ok(node),
                Ok(_) => debug!(node = %name, "Node joined, waiting for Ready"),
                Err(FleetError::NotFound { .. }) => {
                    debug!(node = %name, "Node has not joined yet")
                }
                Err(e) => warn!(node = %name, error = %e, "Readiness check failed"),
            }

            if Utc::now().timestamp() >= deadline {
                return Err(FleetError::ProvisioningTimeout {
                    node: name.to_string(),
                    timeout_secs: self.provisioning.timeout_secs,
                });
            }
            sleep(Duration::from_secs(self.provisioning.poll_interval_secs)).await;
        }
    }

    async fn find_server(&self, name: &str) -> Result<Option<CloudServer>> {
        let servers = self
            .cloud
            .list_servers(&cluster_selector(&self.cluster_name))
            .await?;
        Ok(servers.into_iter().find(|s| s.name == name))
    }

    /// Names are unique per millisecond; collisions would be rejected by
    /// the provider anyway.
    fn next_node_name(&self) -> String {
        format!(
            "{}-worker-{:x}",
            self.cluster_name,
            Utc::now().timestamp_millis()
        )
    }

    /// Cloud-init payload that installs the agent and joins the cluster.
    fn join_user_data(&self, name: &str) -> String {
        format!(
            "#cloud-config\nhostname: {name}\nruncmd:\n  - curl -sfL https://get.k3s.io | K3S_URL={url} K3S_TOKEN={token} K3S_NODE_NAME={name} sh -\n",
            name = name,
            url = self.control_plane_config.api_url,
            token = self.control_plane_config.join_token,
        )
    }

    fn persist_cluster_credentials(&self) -> Result<StoredAt> {
        let kubeconfig = render_kubeconfig(
            &self.cluster_name,
            &self.control_plane_config.api_url,
            &self.control_plane_config.bearer_token,
        );
        self.secrets.store_kubeconfig(&self.cluster_name, &kubeconfig)
    }
}

/// Minimal kubeconfig for the managed cluster.
fn render_kubeconfig(cluster: &str, api_url: &str, token: &str) -> String {
    format!(
        "apiVersion: v1\nkind: Config\nclusters:\n- name: {cluster}\n  cluster:\n    server: {api_url}\ncontexts:\n- name: {cluster}\n  context:\n    cluster: {cluster}\n    user: {cluster}-admin\ncurrent-context: {cluster}\nusers:\n- name: {cluster}-admin\n  user:\n    token: {token}\n",
        cluster = cluster,
        api_url = api_url,
        token = token,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::{server, worker, MockCloud, MockControlPlane, PodBuilder};
    use std::sync::atomic::Ordering;

    fn provisioning(timeout_secs: u64) -> ProvisioningConfig {
        ProvisioningConfig {
            timeout_secs,
            poll_interval_secs: 0,
            drain_grace_secs: 30,
        }
    }

    fn manager(
        cloud: Arc<MockCloud>,
        cp: Arc<MockControlPlane>,
        timeout_secs: u64,
    ) -> NodeLifecycleManager {
        let dir = tempfile::tempdir().unwrap();
        NodeLifecycleManager::new(
            cloud,
            cp,
            "fleet",
            ProviderConfig::default(),
            ControlPlaneConfig {
                api_url: "https://cp.example:6443".into(),
                bearer_token: "cp-token".into(),
                join_token: "join-token".into(),
            },
            provisioning(timeout_secs),
            SecretStore::new(Some("passphrase"), dir.path()),
            StructuredLogger::new("fleet"),
            FleetMetrics::new(),
        )
    }

    #[tokio::test]
    async fn test_provision_waits_for_ready() {
        let cloud = Arc::new(MockCloud::default());
        let cp = Arc::new(MockControlPlane::default());
        cp.auto_ready.store(true, Ordering::SeqCst);

        let mgr = manager(cloud.clone(), cp, 600);
        let node = mgr.provision_node().await.unwrap();

        assert!(node.name.starts_with("fleet-worker-"));
        assert!(node.ready);
        let calls = cloud.calls();
        assert!(calls[0].starts_with("create_server:fleet-worker-"));
    }

    #[tokio::test]
    async fn test_provision_timeout_leaves_instance() {
        let cloud = Arc::new(MockCloud::default());
        let cp = Arc::new(MockControlPlane::default());
        // auto_ready off: the node never joins

        let mgr = manager(cloud.clone(), cp, 0);
        let err = mgr.provision_node().await.unwrap_err();

        assert_eq!(err.code(), "PROVISIONING_TIMEOUT");
        let calls = cloud.calls();
        assert!(calls.iter().any(|c| c.starts_with("create_server:")));
        assert!(!calls.iter().any(|c| c.starts_with("delete_server:")));
        assert_eq!(cloud.servers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_decommission_cordons_drains_then_deletes() {
        let now = Utc::now().timestamp();
        let cloud = Arc::new(MockCloud::with_servers(vec![server(
            7,
            "fleet-worker-a",
            now - 7200,
        )]));
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "fleet-worker-a",
            30.0,
            now - 7200,
        )]));
        cp.pods
            .lock()
            .unwrap()
            .push(PodBuilder::new("web-1", "default").build());

        let mgr = manager(cloud.clone(), cp.clone(), 600);
        mgr.decommission_node("fleet-worker-a").await.unwrap();

        let cp_calls = cp.calls();
        let cordon = cp_calls
            .iter()
            .position(|c| c == "set_schedulable:fleet-worker-a:false")
            .unwrap();
        let evict = cp_calls.iter().position(|c| c == "evict:default/web-1").unwrap();
        let delete = cp_calls
            .iter()
            .position(|c| c == "delete_node:fleet-worker-a")
            .unwrap();
        assert!(cordon < evict && evict < delete);
        assert!(cloud.calls().contains(&"delete_server:7".to_string()));
    }

    #[tokio::test]
    async fn test_drain_skips_daemon_sets_and_force_deletes_stuck_pods() {
        let now = Utc::now().timestamp();
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "fleet-worker-a",
            30.0,
            now,
        )]));
        {
            let mut pods = cp.pods.lock().unwrap();
            pods.push(PodBuilder::new("web-1", "default").build());
            pods.push(PodBuilder::new("stuck-1", "default").build());
            pods.push(PodBuilder::new("agent-1", "kube-system").daemon_set().build());
        }
        cp.failing_evictions.lock().unwrap().insert("stuck-1".into());

        let mgr = manager(Arc::new(MockCloud::default()), cp.clone(), 600);
        mgr.drain("fleet-worker-a").await.unwrap();

        let calls = cp.calls();
        assert!(calls.contains(&"evict:default/web-1".to_string()));
        assert!(calls.contains(&"force_delete:default/stuck-1".to_string()));
        assert!(!calls.iter().any(|c| c.contains("agent-1")));
    }

    #[tokio::test]
    async fn test_concurrent_operations_on_same_node_are_rejected() {
        let cp = Arc::new(MockControlPlane::default());
        let mgr = manager(Arc::new(MockCloud::default()), cp, 600);

        let _guard = mgr.acquire("fleet-worker-a").unwrap();
        assert!(mgr.is_busy("fleet-worker-a"));

        let err = mgr.drain("fleet-worker-a").await.unwrap_err();
        assert_eq!(err.code(), "BUSY");
    }

    #[tokio::test]
    async fn test_lock_released_after_operation() {
        let cp = Arc::new(MockControlPlane::default());
        let mgr = manager(Arc::new(MockCloud::default()), cp, 600);

        {
            let _guard = mgr.acquire("fleet-worker-a").unwrap();
        }
        assert!(!mgr.is_busy("fleet-worker-a"));
        assert!(mgr.acquire("fleet-worker-a").is_ok());
    }

    #[tokio::test]
    async fn test_power_action_does_not_touch_cluster() {
        let now = Utc::now().timestamp();
        let cloud = Arc::new(MockCloud::with_servers(vec![server(
            9,
            "fleet-worker-a",
            now,
        )]));
        let cp = Arc::new(MockControlPlane::default());

        let mgr = manager(cloud.clone(), cp.clone(), 600);
        mgr.power_action("fleet-worker-a", PowerAction::Reboot)
            .await
            .unwrap();

        assert!(cloud.calls().contains(&"power:9:reboot".to_string()));
        assert!(cp.calls().is_empty());
    }

    #[tokio::test]
    async fn test_power_action_unknown_node() {
        let mgr = manager(
            Arc::new(MockCloud::default()),
            Arc::new(MockControlPlane::default()),
            600,
        );
        let err = mgr
            .power_action("ghost", PowerAction::PowerOff)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_reconcile_flags_but_never_deletes_orphans() {
        let now = Utc::now().timestamp();
        let cloud = Arc::new(MockCloud::with_servers(vec![
            // Matched by a node: not an orphan
            server(1, "fleet-worker-a", now - 7200),
            // Old and unmatched: orphan
            server(2, "fleet-worker-b", now - 7200),
            // Unmatched but still inside the provisioning window
            server(3, "fleet-worker-c", now - 10),
        ]));
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "fleet-worker-a",
            30.0,
            now - 7200,
        )]));

        let mgr = manager(cloud.clone(), cp, 600);
        let orphans = mgr.reconcile_orphans().await.unwrap();

        assert_eq!(orphans, vec!["fleet-worker-b".to_string()]);
        assert!(!cloud.calls().iter().any(|c| c.starts_with("delete_server:")));
        assert_eq!(cloud.servers.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_rendered_kubeconfig_targets_cluster() {
        let kubeconfig = render_kubeconfig("fleet", "https://cp.example:6443", "tok");
        assert!(kubeconfig.contains("server: https://cp.example:6443"));
        assert!(kubeconfig.contains("current-context: fleet"));
        assert!(kubeconfig.contains("token: tok"));
    }
}
