//! Core library for the fleet orchestrator
//!
//! This crate provides the orchestration logic for a managed cluster:
//! - Health monitoring with threshold alerts
//! - Policy-driven autoscaling
//! - Node provisioning, draining and decommissioning
//! - Container registry management
//! - Health checks and observability

pub mod autoscaler;
pub mod clients;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod orchestrator;
pub mod registry;

pub use config::OrchestratorConfig;
pub use error::{FleetError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{FleetMetrics, StructuredLogger};
pub use orchestrator::Orchestrator;
