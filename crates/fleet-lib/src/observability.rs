//! Observability infrastructure for the fleet orchestrator
//!
//! Provides:
//! - Prometheus metrics (poll/evaluation latency, node gauges, alert and scaling counters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for upstream-facing operations (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<FleetMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct FleetMetricsInner {
    poll_duration_seconds: Histogram,
    evaluation_duration_seconds: Histogram,
    nodes_total: IntGauge,
    nodes_ready: IntGauge,
    open_alerts: IntGauge,
    orphaned_instances: IntGauge,
    poll_errors: IntCounter,
    scaling_events: IntCounterVec,
    provisioning_failures: IntCounter,
}

impl FleetMetricsInner {
    fn new() -> Self {
        Self {
            poll_duration_seconds: register_histogram!(
                "fleet_poll_duration_seconds",
                "Time spent polling the control plane for node state",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_duration_seconds"),

            evaluation_duration_seconds: register_histogram!(
                "fleet_evaluation_duration_seconds",
                "Time spent evaluating autoscaling policies",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_duration_seconds"),

            nodes_total: register_int_gauge!(
                "fleet_nodes_total",
                "Number of worker nodes known to the orchestrator"
            )
            .expect("Failed to register nodes_total"),

            nodes_ready: register_int_gauge!(
                "fleet_nodes_ready",
                "Number of worker nodes currently reporting Ready"
            )
            .expect("Failed to register nodes_ready"),

            open_alerts: register_int_gauge!(
                "fleet_open_alerts",
                "Number of unresolved health alerts"
            )
            .expect("Failed to register open_alerts"),

            orphaned_instances: register_int_gauge!(
                "fleet_orphaned_instances",
                "Provider instances with no matching cluster node"
            )
            .expect("Failed to register orphaned_instances"),

            poll_errors: register_int_counter!(
                "fleet_poll_errors_total",
                "Total number of failed health polls"
            )
            .expect("Failed to register poll_errors"),

            scaling_events: register_int_counter_vec!(
                "fleet_scaling_events_total",
                "Total number of scaling actions taken",
                &["direction"]
            )
            .expect("Failed to register scaling_events"),

            provisioning_failures: register_int_counter!(
                "fleet_provisioning_failures_total",
                "Total number of node provisioning attempts that failed"
            )
            .expect("Failed to register provisioning_failures"),
        }
    }
}

/// Orchestrator metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct FleetMetrics {
    _private: (),
}

impl Default for FleetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(FleetMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &FleetMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a health poll latency observation
    pub fn observe_poll_duration(&self, duration_secs: f64) {
        self.inner().poll_duration_seconds.observe(duration_secs);
    }

    /// Record an autoscaler evaluation latency observation
    pub fn observe_evaluation_duration(&self, duration_secs: f64) {
        self.inner()
            .evaluation_duration_seconds
            .observe(duration_secs);
    }

    /// Update worker node gauges
    pub fn set_node_counts(&self, total: i64, ready: i64) {
        self.inner().nodes_total.set(total);
        self.inner().nodes_ready.set(ready);
    }

    /// Update the open alert gauge
    pub fn set_open_alerts(&self, count: i64) {
        self.inner().open_alerts.set(count);
    }

    /// Update the orphaned instance gauge
    pub fn set_orphaned_instances(&self, count: i64) {
        self.inner().orphaned_instances.set(count);
    }

    /// Increment the failed poll counter
    pub fn inc_poll_errors(&self) {
        self.inner().poll_errors.inc();
    }

    /// Increment the scaling event counter for a direction ("up" or "down")
    pub fn inc_scaling_events(&self, direction: &str) {
        self.inner()
            .scaling_events
            .with_label_values(&[direction])
            .inc();
    }

    /// Increment the provisioning failure counter
    pub fn inc_provisioning_failures(&self) {
        self.inner().provisioning_failures.inc();
    }
}

/// Structured logger for orchestrator events
///
/// Provides consistent JSON-formatted logging for alerts, scaling
/// actions, and node lifecycle transitions.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_name: String,
}

impl StructuredLogger {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }

    /// Log orchestrator startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "orchestrator_started",
            cluster = %self.cluster_name,
            version = %version,
            "Fleet orchestrator started"
        );
    }

    /// Log orchestrator shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "orchestrator_shutdown",
            cluster = %self.cluster_name,
            reason = %reason,
            "Fleet orchestrator shutting down"
        );
    }

    /// Log a newly opened health alert
    pub fn log_alert_opened(&self, node: &str, metric: &str, severity: &str, value: f64) {
        match severity {
            "critical" => {
                warn!(
                    event = "alert_opened",
                    cluster = %self.cluster_name,
                    node = %node,
                    metric = %metric,
                    severity = %severity,
                    value = value,
                    "Critical health alert opened"
                );
            }
            _ => {
                info!(
                    event = "alert_opened",
                    cluster = %self.cluster_name,
                    node = %node,
                    metric = %metric,
                    severity = %severity,
                    value = value,
                    "Health alert opened"
                );
            }
        }
    }

    /// Log a resolved health alert
    pub fn log_alert_resolved(&self, node: &str, metric: &str) {
        info!(
            event = "alert_resolved",
            cluster = %self.cluster_name,
            node = %node,
            metric = %metric,
            "Health alert resolved"
        );
    }

    /// Log a scaling action
    pub fn log_scaling_event(&self, policy: &str, direction: &str, node: Option<&str>, count: usize) {
        info!(
            event = "scaling_action",
            cluster = %self.cluster_name,
            policy = %policy,
            direction = %direction,
            node = ?node,
            node_count_after = count,
            "Autoscaler took a scaling action"
        );
    }

    /// Log a completed node provisioning
    pub fn log_provisioned(&self, node: &str, server_id: u64, duration_secs: u64) {
        info!(
            event = "node_provisioned",
            cluster = %self.cluster_name,
            node = %node,
            server_id = server_id,
            duration_secs = duration_secs,
            "Node provisioned and joined the cluster"
        );
    }

    /// Log a completed node decommission
    pub fn log_decommissioned(&self, node: &str, server_id: Option<u64>) {
        info!(
            event = "node_decommissioned",
            cluster = %self.cluster_name,
            node = %node,
            server_id = ?server_id,
            "Node drained and removed from the cluster"
        );
    }

    /// Log orphaned provider instances found during reconciliation
    pub fn log_orphans(&self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        warn!(
            event = "orphans_detected",
            cluster = %self.cluster_name,
            count = names.len(),
            instances = ?names,
            "Provider instances without matching cluster nodes"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_metrics_creation() {
        // Prometheus uses a process-global registry, so this only runs once
        // per test binary. We exercise every handle method here.
        let metrics = FleetMetrics::new();

        metrics.observe_poll_duration(0.05);
        metrics.observe_evaluation_duration(0.01);
        metrics.set_node_counts(3, 2);
        metrics.set_open_alerts(1);
        metrics.set_orphaned_instances(0);
        metrics.inc_poll_errors();
        metrics.inc_scaling_events("up");
        metrics.inc_provisioning_failures();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-cluster");
        assert_eq!(logger.cluster_name, "test-cluster");
    }
}
