//! Error types for the fleet orchestrator

use std::fmt;

/// Result type alias using FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

/// Error taxonomy shared by all orchestrator modules
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Required configuration is missing or invalid; fatal at startup
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed caller input; never retried
    #[error("invalid request: {0}")]
    Validation(String),

    /// A named node, policy, repository or tag does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// A provider / control-plane / registry call failed; transient
    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    /// A freshly provisioned node did not join the cluster in time.
    /// The backing cloud instance is left in place for reconciliation.
    #[error("node '{node}' did not become ready within {timeout_secs}s")]
    ProvisioningTimeout { node: String, timeout_secs: u64 },

    /// A lifecycle operation is already running for the target node
    #[error("lifecycle operation already in progress for node '{0}'")]
    Busy(String),

    /// Unexpected internal failure (crypto, local I/O)
    #[error("internal error: {0}")]
    Internal(String),
}

impl FleetError {
    pub fn configuration(message: impl Into<String>) -> Self {
        FleetError::Configuration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        FleetError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        FleetError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Wrap an upstream failure without leaking the raw response body
    pub fn upstream(service: &'static str, message: impl fmt::Display) -> Self {
        FleetError::Upstream {
            service,
            message: message.to_string(),
        }
    }

    pub fn internal<E: fmt::Display>(err: E) -> Self {
        FleetError::Internal(err.to_string())
    }

    /// Whether a caller may reasonably retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, FleetError::Upstream { .. } | FleetError::Busy(_))
    }

    /// Stable error code for API responses and logs
    pub fn code(&self) -> &'static str {
        match self {
            FleetError::Configuration(_) => "CONFIGURATION",
            FleetError::Validation(_) => "VALIDATION",
            FleetError::NotFound { .. } => "NOT_FOUND",
            FleetError::Upstream { .. } => "UPSTREAM",
            FleetError::ProvisioningTimeout { .. } => "PROVISIONING_TIMEOUT",
            FleetError::Busy(_) => "BUSY",
            FleetError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Internal(format!("serialization error: {}", err))
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::Internal(format!("io error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(FleetError::not_found("node", "worker-1").code(), "NOT_FOUND");
        assert_eq!(
            FleetError::validation("nodeName is required").code(),
            "VALIDATION"
        );
        assert_eq!(
            FleetError::ProvisioningTimeout {
                node: "worker-1".into(),
                timeout_secs: 600,
            }
            .code(),
            "PROVISIONING_TIMEOUT"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FleetError::upstream("provider", "503").is_retryable());
        assert!(FleetError::Busy("worker-1".into()).is_retryable());
        assert!(!FleetError::validation("bad action").is_retryable());
        assert!(!FleetError::not_found("tag", "app:v1").is_retryable());
    }

    #[test]
    fn test_display_does_not_leak_kind_internals() {
        let err = FleetError::upstream("control-plane", "status 502");
        assert_eq!(
            err.to_string(),
            "control-plane request failed: status 502"
        );
    }
}
