//! Cluster health monitor
//!
//! Periodically polls the control plane for node state, classifies every
//! sample against configured thresholds, maintains the deduplicated alert
//! set and serves metric snapshots to the API and the autoscaler.
//!
//! A failed poll never mutates monitor state; consumers keep seeing the
//! last completed snapshot.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::clients::ControlPlane;
use crate::config::MonitoringConfig;
use crate::error::{FleetError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{
    Alert, AlertSeverity, ClusterMetrics, HealthMetric, MetricKind, MetricStatus, Node,
    NodeSummary, Threshold,
};
use crate::observability::{FleetMetrics, StructuredLogger};

/// Key identifying the single open alert allowed per node and metric
type AlertKey = (String, MetricKind);

#[derive(Default)]
struct MonitorState {
    /// Nodes from the last completed poll, by name
    nodes: HashMap<String, Node>,
    /// Samples from the last completed poll
    latest: Vec<HealthMetric>,
    /// Bounded sample history for retention queries
    history: VecDeque<HealthMetric>,
    /// All alerts ever raised, open and resolved
    alerts: Vec<Alert>,
    /// Open alert index into `alerts` by (node, metric)
    open_alerts: HashMap<AlertKey, usize>,
    next_alert_id: u64,
    /// Cluster aggregates from the last completed poll
    cluster: Option<ClusterMetrics>,
    last_poll: Option<i64>,
}

/// Health monitor over one control plane
pub struct HealthMonitor {
    control_plane: Arc<dyn ControlPlane>,
    config: MonitoringConfig,
    logger: StructuredLogger,
    metrics: FleetMetrics,
    state: RwLock<MonitorState>,
}

impl HealthMonitor {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        config: MonitoringConfig,
        logger: StructuredLogger,
        metrics: FleetMetrics,
    ) -> Self {
        Self {
            control_plane,
            config,
            logger,
            metrics,
            state: RwLock::new(MonitorState::default()),
        }
    }

    /// Run one poll cycle: fetch nodes, classify samples, update alerts.
    pub async fn poll_once(&self) -> Result<()> {
        let start = Instant::now();
        let nodes = match self.control_plane.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                self.metrics.inc_poll_errors();
                return Err(e);
            }
        };
        self.metrics
            .observe_poll_duration(start.elapsed().as_secs_f64());

        let now = Utc::now().timestamp();
        let mut samples = self.classify(&nodes, now);
        let cluster = cluster_aggregates(&nodes, now);

        // Cluster-scoped samples carry no node and never raise alerts
        let t = &self.config.thresholds;
        for (kind, value, threshold) in [
            (MetricKind::Cpu, cluster.cpu_percent, t.cpu),
            (MetricKind::Memory, cluster.memory_percent, t.memory),
        ] {
            samples.push(HealthMetric {
                kind,
                node: None,
                value,
                status: threshold.classify(value),
                timestamp: now,
            });
        }

        let mut state = self.state.write().await;
        self.update_alerts(&mut state, &samples, now);

        let retention_floor = now - self.config.metrics_retention_hours as i64 * 3600;
        prune_resolved_alerts(&mut state, retention_floor);
        for sample in &samples {
            state.history.push_back(sample.clone());
        }
        while state
            .history
            .front()
            .map(|s| s.timestamp < retention_floor)
            .unwrap_or(false)
        {
            state.history.pop_front();
        }

        state.nodes = nodes.into_iter().map(|n| (n.name.clone(), n)).collect();
        state.latest = samples;
        state.cluster = Some(cluster.clone());
        state.last_poll = Some(now);

        let open = state.open_alerts.len();
        drop(state);

        self.metrics
            .set_node_counts(cluster.worker_count as i64, cluster.ready_workers as i64);
        self.metrics.set_open_alerts(open as i64);

        debug!(
            workers = cluster.worker_count,
            ready = cluster.ready_workers,
            open_alerts = open,
            "Health poll complete"
        );
        Ok(())
    }

    /// Classify every node against the configured thresholds.
    fn classify(&self, nodes: &[Node], now: i64) -> Vec<HealthMetric> {
        let t = &self.config.thresholds;
        let mut samples = Vec::with_capacity(nodes.len() * 4);

        for node in nodes {
            let per_node: [(MetricKind, f64, Threshold); 4] = [
                (MetricKind::Cpu, node.cpu_percent(), t.cpu),
                (MetricKind::Memory, node.memory_percent(), t.memory),
                (MetricKind::Disk, node.disk_percent(), t.disk),
                (MetricKind::Heartbeat, node.heartbeat_age_secs(now), t.heartbeat),
            ];
            for (kind, value, threshold) in per_node {
                samples.push(HealthMetric {
                    kind,
                    node: Some(node.name.clone()),
                    value,
                    status: threshold.classify(value),
                    timestamp: now,
                });
            }
        }

        samples
    }

    /// Apply alert transitions for one poll's samples. At most one open
    /// alert exists per (node, metric); a repeat breach refreshes it and
    /// a healthy sample resolves it.
    fn update_alerts(&self, state: &mut MonitorState, samples: &[HealthMetric], now: i64) {
        for sample in samples {
            let node = match &sample.node {
                Some(node) => node.clone(),
                None => continue,
            };
            let key = (node.clone(), sample.kind);

            match sample.status {
                MetricStatus::Warning | MetricStatus::Critical => {
                    let severity = if sample.status == MetricStatus::Critical {
                        AlertSeverity::Critical
                    } else {
                        AlertSeverity::Warning
                    };

                    if let Some(&idx) = state.open_alerts.get(&key) {
                        let alert = &mut state.alerts[idx];
                        alert.last_seen = now;
                        alert.value = sample.value;
                        // Escalation only; a critical alert does not drop
                        // back to warning until it resolves
                        if severity == AlertSeverity::Critical {
                            alert.severity = AlertSeverity::Critical;
                        }
                    } else {
                        let id = state.next_alert_id;
                        state.next_alert_id += 1;
                        let message = alert_message(&node, sample.kind, sample.value);
                        self.logger.log_alert_opened(
                            &node,
                            &sample.kind.to_string(),
                            &severity.to_string(),
                            sample.value,
                        );
                        state.alerts.push(Alert {
                            id,
                            node: node.clone(),
                            metric: sample.kind,
                            severity,
                            message,
                            value: sample.value,
                            first_seen: now,
                            last_seen: now,
                            resolved_at: None,
                            acknowledged: false,
                        });
                        state.open_alerts.insert(key, state.alerts.len() - 1);
                    }
                }
                MetricStatus::Healthy => {
                    if let Some(idx) = state.open_alerts.remove(&key) {
                        state.alerts[idx].resolved_at = Some(now);
                        self.logger
                            .log_alert_resolved(&node, &sample.kind.to_string());
                    }
                }
            }
        }

        // Nodes that vanished from the inventory resolve their alerts
        let seen: std::collections::HashSet<&str> = samples
            .iter()
            .filter_map(|s| s.node.as_deref())
            .collect();
        let stale: Vec<AlertKey> = state
            .open_alerts
            .keys()
            .filter(|(node, _)| !seen.contains(node.as_str()))
            .cloned()
            .collect();
        for key in stale {
            if let Some(idx) = state.open_alerts.remove(&key) {
                state.alerts[idx].resolved_at = Some(now);
                self.logger.log_alert_resolved(&key.0, &key.1.to_string());
            }
        }
    }

    /// Retained samples, oldest first, optionally filtered to one node
    /// and to timestamps at or after `since`. The window is bounded by
    /// the configured metrics retention.
    pub async fn metric_history(
        &self,
        node: Option<&str>,
        since: Option<i64>,
    ) -> Vec<HealthMetric> {
        let state = self.state.read().await;
        state
            .history
            .iter()
            .filter(|m| node.map_or(true, |n| m.node.as_deref() == Some(n)))
            .filter(|m| since.map_or(true, |s| m.timestamp >= s))
            .cloned()
            .collect()
    }

    /// Latest samples, optionally filtered to one node.
    pub async fn node_metrics(&self, node: Option<&str>) -> Vec<HealthMetric> {
        let state = self.state.read().await;
        match node {
            Some(name) => state
                .latest
                .iter()
                .filter(|m| m.node.as_deref() == Some(name))
                .cloned()
                .collect(),
            None => state.latest.clone(),
        }
    }

    /// Per-node status lines from the last completed poll.
    pub async fn node_summaries(&self) -> Vec<NodeSummary> {
        let state = self.state.read().await;
        let mut summaries: Vec<NodeSummary> = state
            .nodes
            .values()
            .map(|node| {
                let status = state
                    .latest
                    .iter()
                    .filter(|m| m.node.as_deref() == Some(node.name.as_str()))
                    .map(|m| m.status)
                    .max()
                    .unwrap_or(MetricStatus::Healthy);
                NodeSummary {
                    name: node.name.clone(),
                    role: node.role,
                    ready: node.ready,
                    schedulable: node.schedulable,
                    status,
                    cpu_percent: node.cpu_percent(),
                    memory_percent: node.memory_percent(),
                    disk_percent: node.disk_percent(),
                    pod_count: node.pod_count,
                    pod_capacity: node.pod_capacity,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Cluster aggregates from the last completed poll, if any.
    pub async fn cluster_metrics(&self) -> Option<ClusterMetrics> {
        self.state.read().await.cluster.clone()
    }

    /// Worst status across the latest samples for one node, if known.
    pub async fn node_status(&self, name: &str) -> Option<MetricStatus> {
        let state = self.state.read().await;
        if !state.nodes.contains_key(name) {
            return None;
        }
        Some(
            state
                .latest
                .iter()
                .filter(|m| m.node.as_deref() == Some(name))
                .map(|m| m.status)
                .max()
                .unwrap_or(MetricStatus::Healthy),
        )
    }

    /// Worker nodes from the last completed poll.
    pub async fn worker_nodes(&self) -> Vec<Node> {
        let state = self.state.read().await;
        let mut workers: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| n.is_worker())
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        workers
    }

    /// Alerts, newest first. With `open_only` the resolved ones are skipped.
    pub async fn alerts(&self, open_only: bool) -> Vec<Alert> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .iter()
            .filter(|a| !open_only || a.is_open())
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(b.id.cmp(&a.id)));
        alerts
    }

    /// Mark an alert acknowledged. Acknowledgement silences nothing; it
    /// only records that an operator has seen the alert.
    pub async fn acknowledge_alert(&self, id: u64) -> Result<Alert> {
        let mut state = self.state.write().await;
        let alert = state
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| FleetError::not_found("alert", id.to_string()))?;
        alert.acknowledged = true;
        Ok(alert.clone())
    }

    /// The monitor is unhealthy when it has not completed a poll within
    /// twice its configured interval.
    pub async fn health_check(&self) -> std::result::Result<(), String> {
        let state = self.state.read().await;
        match state.last_poll {
            None => Err("no completed poll yet".to_string()),
            Some(last) => {
                let age = Utc::now().timestamp() - last;
                let limit = (self.config.check_interval_secs * 2) as i64;
                if age > limit {
                    Err(format!("last poll {}s ago exceeds {}s limit", age, limit))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Background polling loop. Exits when the shutdown channel fires.
    pub async fn run(
        self: Arc<Self>,
        health: HealthRegistry,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            interval_secs = self.config.check_interval_secs,
            "Starting health monitor loop"
        );
        let mut ticker = interval(std::time::Duration::from_secs(
            self.config.check_interval_secs.max(1),
        ));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(()) => health.set_healthy(components::MONITOR).await,
                        Err(e) => {
                            warn!(error = %e, "Health poll failed");
                            health
                                .set_degraded(components::MONITOR, e.to_string())
                                .await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down health monitor loop");
                    break;
                }
            }
        }
    }
}

/// Drop resolved alerts older than the retention floor. Open alerts are
/// never dropped; the open-alert index is rebuilt after compaction since
/// it holds positions into the alert vector.
fn prune_resolved_alerts(state: &mut MonitorState, floor: i64) {
    let before = state.alerts.len();
    state.alerts.retain(|a| match a.resolved_at {
        None => true,
        Some(at) => at >= floor,
    });
    if state.alerts.len() != before {
        state.open_alerts = state
            .alerts
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_open())
            .map(|(idx, a)| ((a.node.clone(), a.metric), idx))
            .collect();
    }
}

fn alert_message(node: &str, kind: MetricKind, value: f64) -> String {
    match kind {
        MetricKind::Heartbeat => format!(
            "node {} last heartbeat {:.0}s ago",
            node, value
        ),
        _ => format!("node {} {} at {:.1}%", node, kind, value),
    }
}

/// Cluster-wide aggregates over worker nodes only. Control plane nodes
/// never count toward scaling signals.
fn cluster_aggregates(nodes: &[Node], now: i64) -> ClusterMetrics {
    let workers: Vec<&Node> = nodes.iter().filter(|n| n.is_worker()).collect();
    let worker_count = workers.len() as u32;
    let ready_workers = workers.iter().filter(|n| n.ready).count() as u32;

    let cpu_capacity: f64 = workers.iter().map(|n| n.cpu_capacity_cores).sum();
    let cpu_usage: f64 = workers.iter().map(|n| n.cpu_usage_cores).sum();
    let memory_capacity: u64 = workers.iter().map(|n| n.memory_capacity_bytes).sum();
    let memory_usage: u64 = workers.iter().map(|n| n.memory_usage_bytes).sum();
    let pod_capacity: u32 = workers.iter().map(|n| n.pod_capacity).sum();
    let total_pods: u32 = workers.iter().map(|n| n.pod_count).sum();

    ClusterMetrics {
        worker_count,
        ready_workers,
        cpu_percent: if cpu_capacity > 0.0 {
            cpu_usage / cpu_capacity * 100.0
        } else {
            0.0
        },
        memory_percent: if memory_capacity > 0 {
            memory_usage as f64 / memory_capacity as f64 * 100.0
        } else {
            0.0
        },
        pod_percent: if pod_capacity > 0 {
            total_pods as f64 / pod_capacity as f64 * 100.0
        } else {
            0.0
        },
        total_pods,
        timestamp: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::{worker, MockControlPlane};
    use crate::config::MonitoringConfig;

    fn monitor(control_plane: Arc<MockControlPlane>) -> HealthMonitor {
        HealthMonitor::new(
            control_plane,
            MonitoringConfig::default(),
            StructuredLogger::new("test-cluster"),
            FleetMetrics::new(),
        )
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    #[tokio::test]
    async fn test_poll_opens_critical_alert() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "worker-1",
            95.0,
            now() - 3600,
        )]));
        let mon = monitor(cp);
        mon.poll_once().await.unwrap();

        let alerts = mon.alerts(true).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].node, "worker-1");
        assert_eq!(alerts[0].metric, MetricKind::Cpu);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn test_repeat_breach_refreshes_instead_of_duplicating() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "worker-1",
            95.0,
            now() - 3600,
        )]));
        let mon = monitor(cp);
        mon.poll_once().await.unwrap();
        mon.poll_once().await.unwrap();
        mon.poll_once().await.unwrap();

        let open = mon.alerts(true).await;
        assert_eq!(open.len(), 1);
        assert_eq!(mon.alerts(false).await.len(), 1);
    }

    #[tokio::test]
    async fn test_recovery_resolves_alert() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "worker-1",
            95.0,
            now() - 3600,
        )]));
        let mon = monitor(cp.clone());
        mon.poll_once().await.unwrap();
        assert_eq!(mon.alerts(true).await.len(), 1);

        cp.set_nodes(vec![worker("worker-1", 20.0, now() - 3600)]);
        mon.poll_once().await.unwrap();

        assert!(mon.alerts(true).await.is_empty());
        let all = mon.alerts(false).await;
        assert_eq!(all.len(), 1);
        assert!(all[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_poll_preserves_last_snapshot() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "worker-1",
            50.0,
            now() - 3600,
        )]));
        let mon = monitor(cp.clone());
        mon.poll_once().await.unwrap();
        let before = mon.cluster_metrics().await.unwrap();

        cp.fail_next_list();
        assert!(mon.poll_once().await.is_err());

        let after = mon.cluster_metrics().await.unwrap();
        assert_eq!(after.timestamp, before.timestamp);
        assert_eq!(mon.node_summaries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cluster_metrics_exclude_control_plane() {
        let mut cp_node = worker("control-1", 99.0, now() - 3600);
        cp_node.role = crate::models::NodeRole::ControlPlane;
        let cp = Arc::new(MockControlPlane::with_nodes(vec![
            cp_node,
            worker("worker-1", 40.0, now() - 3600),
        ]));
        let mon = monitor(cp);
        mon.poll_once().await.unwrap();

        let metrics = mon.cluster_metrics().await.unwrap();
        assert_eq!(metrics.worker_count, 1);
        assert!((metrics.cpu_percent - 40.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_node_summary_reports_worst_status() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "worker-1",
            75.0,
            now() - 3600,
        )]));
        let mon = monitor(cp);
        mon.poll_once().await.unwrap();

        let summaries = mon.node_summaries().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, MetricStatus::Warning);
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_alert() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![]));
        let mon = monitor(cp);
        let err = mon.acknowledge_alert(99).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_acknowledge_alert() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "worker-1",
            95.0,
            now() - 3600,
        )]));
        let mon = monitor(cp);
        mon.poll_once().await.unwrap();

        let id = mon.alerts(true).await[0].id;
        let acked = mon.acknowledge_alert(id).await.unwrap();
        assert!(acked.acknowledged);
        // Acknowledged but still open
        assert_eq!(mon.alerts(true).await.len(), 1);
    }

    #[tokio::test]
    async fn test_health_check_before_first_poll() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![]));
        let mon = monitor(cp);
        assert!(mon.health_check().await.is_err());
        mon.poll_once().await.unwrap();
        assert!(mon.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_metric_history_spans_polls() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "worker-1",
            50.0,
            now() - 3600,
        )]));
        let mon = monitor(cp);
        mon.poll_once().await.unwrap();
        mon.poll_once().await.unwrap();

        // Per poll: four node samples plus two cluster samples
        let all = mon.metric_history(None, None).await;
        assert_eq!(all.len(), 12);

        let node_only = mon.metric_history(Some("worker-1"), None).await;
        assert_eq!(node_only.len(), 8);
        assert!(node_only.iter().all(|m| m.node.as_deref() == Some("worker-1")));

        let future = mon.metric_history(None, Some(now() + 60)).await;
        assert!(future.is_empty());
    }

    #[tokio::test]
    async fn test_resolved_alerts_age_out_of_retention() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![worker(
            "worker-1",
            95.0,
            now() - 3600,
        )]));
        let mon = monitor(cp.clone());
        mon.poll_once().await.unwrap();
        cp.set_nodes(vec![worker("worker-1", 20.0, now() - 3600)]);
        mon.poll_once().await.unwrap();
        assert_eq!(mon.alerts(false).await.len(), 1);

        {
            let mut state = mon.state.write().await;
            state.alerts[0].resolved_at = Some(now() - 200 * 3600);
        }
        mon.poll_once().await.unwrap();

        assert!(mon.alerts(false).await.is_empty());
    }

    #[tokio::test]
    async fn test_prune_keeps_open_alert_tracking_intact() {
        let cp = Arc::new(MockControlPlane::with_nodes(vec![
            worker("worker-a", 95.0, now() - 3600),
            worker("worker-b", 95.0, now() - 3600),
        ]));
        let mon = monitor(cp.clone());
        mon.poll_once().await.unwrap();
        assert_eq!(mon.alerts(true).await.len(), 2);

        // worker-b recovers; its resolved alert then ages out
        cp.set_nodes(vec![
            worker("worker-a", 95.0, now() - 3600),
            worker("worker-b", 20.0, now() - 3600),
        ]);
        mon.poll_once().await.unwrap();
        {
            let mut state = mon.state.write().await;
            for alert in state.alerts.iter_mut() {
                if alert.resolved_at.is_some() {
                    alert.resolved_at = Some(now() - 200 * 3600);
                }
            }
        }
        mon.poll_once().await.unwrap();
        mon.poll_once().await.unwrap();

        // The surviving open alert kept refreshing instead of duplicating
        let all = mon.alerts(false).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].node, "worker-a");
        assert!(all[0].is_open());
    }

    #[tokio::test]
    async fn test_missed_heartbeat_raises_alert() {
        let mut node = worker("worker-1", 10.0, now() - 3600);
        node.last_heartbeat = now() - 400;
        let cp = Arc::new(MockControlPlane::with_nodes(vec![node]));
        let mon = monitor(cp);
        mon.poll_once().await.unwrap();

        let alerts = mon.alerts(true).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, MetricKind::Heartbeat);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }
}
