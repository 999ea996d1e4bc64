//! Policy-driven autoscaler
//!
//! Evaluates scaling policies against the monitor's latest completed
//! cluster snapshot and asks the lifecycle manager to provision or
//! decommission workers. Each policy takes at most one action per
//! evaluation, scale-up takes priority over scale-down, and cooldowns
//! are measured against the append-only event history.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::AutoscalerConfig;
use crate::error::{FleetError, Result};
use crate::health::{components, HealthRegistry};
use crate::lifecycle::NodeLifecycleManager;
use crate::models::{
    AutoscalingPolicy, MetricStatus, Node, PolicyUpdate, ScaleDirection, ScalingEvent,
};
use crate::monitor::HealthMonitor;
use crate::observability::{FleetMetrics, StructuredLogger};

struct AutoscalerState {
    policies: BTreeMap<String, AutoscalingPolicy>,
    history: Vec<ScalingEvent>,
}

pub struct Autoscaler {
    monitor: Arc<HealthMonitor>,
    lifecycle: Arc<NodeLifecycleManager>,
    config: AutoscalerConfig,
    logger: StructuredLogger,
    metrics: FleetMetrics,
    state: RwLock<AutoscalerState>,
}

impl Autoscaler {
    pub fn new(
        monitor: Arc<HealthMonitor>,
        lifecycle: Arc<NodeLifecycleManager>,
        config: AutoscalerConfig,
        logger: StructuredLogger,
        metrics: FleetMetrics,
    ) -> Self {
        let policies = config
            .policies
            .iter()
            .cloned()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self {
            monitor,
            lifecycle,
            config,
            logger,
            metrics,
            state: RwLock::new(AutoscalerState {
                policies,
                history: Vec::new(),
            }),
        }
    }

    /// Evaluate every enabled policy once against the latest snapshot.
    /// Returns the scaling events taken during this pass. A policy whose
    /// action fails is logged and skipped; the others still run.
    pub async fn evaluate(&self) -> Result<Vec<ScalingEvent>> {
        let started = Instant::now();
        let metrics = match self.monitor.cluster_metrics().await {
            Some(metrics) => metrics,
            None => {
                debug!("No completed poll yet, skipping evaluation");
                return Ok(Vec::new());
            }
        };

        let policies: Vec<AutoscalingPolicy> = {
            let state = self.state.read().await;
            state.policies.values().filter(|p| p.enabled).cloned().collect()
        };

        let now = Utc::now().timestamp();
        let mut events = Vec::new();

        for policy in policies {
            let aggregate = policy.aggregate(&metrics);
            let count = metrics.worker_count;
            debug!(
                policy = %policy.name,
                aggregate = aggregate,
                workers = count,
                "Evaluating policy"
            );

            let event = if aggregate >= policy.scale_up_threshold
                && count < policy.max_nodes
                && self
                    .cooldown_elapsed(
                        &policy.name,
                        ScaleDirection::Up,
                        policy.scale_up_cooldown_secs,
                        now,
                    )
                    .await
            {
                match self.lifecycle.provision_node().await {
                    Ok(node) => Some(ScalingEvent {
                        policy: policy.name.clone(),
                        direction: ScaleDirection::Up,
                        metrics: metrics.clone(),
                        node_count_after: count + 1,
                        node: Some(node.name),
                        timestamp: Utc::now().timestamp(),
                    }),
                    Err(e) => {
                        warn!(policy = %policy.name, error = %e, "Scale-up failed");
                        None
                    }
                }
            } else if aggregate <= policy.scale_down_threshold
                && count > policy.min_nodes
                && self
                    .cooldown_elapsed(
                        &policy.name,
                        ScaleDirection::Down,
                        policy.scale_down_cooldown_secs,
                        now,
                    )
                    .await
            {
                match self.scale_down_candidate().await {
                    Some(node) => match self.lifecycle.decommission_node(&node.name).await {
                        Ok(()) => Some(ScalingEvent {
                            policy: policy.name.clone(),
                            direction: ScaleDirection::Down,
                            metrics: metrics.clone(),
                            node_count_after: count - 1,
                            node: Some(node.name),
                            timestamp: Utc::now().timestamp(),
                        }),
                        Err(e) => {
                            warn!(policy = %policy.name, node = %node.name, error = %e, "Scale-down failed");
                            None
                        }
                    },
                    None => {
                        debug!(policy = %policy.name, "No eligible scale-down candidate");
                        None
                    }
                }
            } else {
                None
            };

            if let Some(event) = event {
                self.logger.log_scaling_event(
                    &event.policy,
                    &event.direction.to_string(),
                    event.node.as_deref(),
                    event.node_count_after as usize,
                );
                self.metrics
                    .inc_scaling_events(&event.direction.to_string());
                self.record(event.clone()).await;
                events.push(event);
            }
        }

        self.metrics
            .observe_evaluation_duration(started.elapsed().as_secs_f64());
        Ok(events)
    }

    /// Whether enough time has passed since this policy's last event in
    /// the given direction. Events in the opposite direction never gate;
    /// a recent scale-down must not delay an urgent scale-up.
    async fn cooldown_elapsed(
        &self,
        policy: &str,
        direction: ScaleDirection,
        cooldown_secs: u64,
        now: i64,
    ) -> bool {
        let state = self.state.read().await;
        state
            .history
            .iter()
            .filter(|e| e.policy == policy && e.direction == direction)
            .map(|e| e.timestamp)
            .max()
            .map(|last| now - last >= cooldown_secs as i64)
            .unwrap_or(true)
    }

    /// Pick the node to remove: schedulable, not critical, not already
    /// under a lifecycle operation; least CPU load first, oldest as the
    /// tie breaker.
    async fn scale_down_candidate(&self) -> Option<Node> {
        let mut candidates = Vec::new();
        for node in self.monitor.worker_nodes().await {
            if !node.schedulable || self.lifecycle.is_busy(&node.name) {
                continue;
            }
            if self.monitor.node_status(&node.name).await == Some(MetricStatus::Critical) {
                continue;
            }
            candidates.push(node);
        }
        candidates.sort_by(|a, b| {
            a.cpu_percent()
                .total_cmp(&b.cpu_percent())
                .then(a.created_at.cmp(&b.created_at))
        });
        candidates.into_iter().next()
    }

    async fn record(&self, event: ScalingEvent) {
        let mut state = self.state.write().await;
        state.history.push(event);
        let excess = state.history.len().saturating_sub(self.config.history_limit);
        if excess > 0 {
            state.history.drain(..excess);
        }
    }

    /// Current policies, sorted by name.
    pub async fn policies(&self) -> Vec<AutoscalingPolicy> {
        self.state.read().await.policies.values().cloned().collect()
    }

    /// Merge an update into the named policy. The merged result is
    /// validated before anything is committed; a rejected update leaves
    /// the policy untouched.
    pub async fn update_policy(
        &self,
        name: &str,
        update: &PolicyUpdate,
    ) -> Result<AutoscalingPolicy> {
        let mut state = self.state.write().await;
        let current = state
            .policies
            .get(name)
            .ok_or_else(|| FleetError::not_found("policy", name))?;

        let mut merged = current.clone();
        update.apply(&mut merged);
        merged.validate()?;

        info!(policy = %name, "Policy updated");
        state.policies.insert(name.to_string(), merged.clone());
        Ok(merged)
    }

    /// Scaling history, newest first, truncated to `limit` when given.
    pub async fn history(&self, limit: Option<usize>) -> Vec<ScalingEvent> {
        let state = self.state.read().await;
        let mut events: Vec<ScalingEvent> = state.history.iter().rev().cloned().collect();
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        events
    }

    /// Background evaluation loop. Each tick reconciles orphaned provider
    /// instances before evaluating policies, so scaling decisions never
    /// run ahead of a known-inconsistent inventory.
    pub async fn run(
        self: Arc<Self>,
        health: HealthRegistry,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            interval_secs = self.config.evaluate_interval_secs,
            "Starting autoscaler loop"
        );
        let mut ticker = interval(std::time::Duration::from_secs(
            self.config.evaluate_interval_secs.max(1),
        ));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.lifecycle.reconcile_orphans().await {
                        warn!(error = %e, "Orphan reconciliation failed");
                    }
                    match self.evaluate().await {
                        Ok(_) => health.set_healthy(components::AUTOSCALER).await,
                        Err(e) => {
                            warn!(error = %e, "Policy evaluation failed");
                            health
                                .set_degraded(components::AUTOSCALER, e.to_string())
                                .await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down autoscaler loop");
                    break;
                }
            }
        }
    }
}
