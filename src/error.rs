//! Error types for the EdgeFS Operator
//!
//! Provides structured error types for all operator components including
//! cluster spec validation, device layout planning, reconfiguration, and
//! the Kubernetes-facing reconcilers.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    // =========================================================================
    // Cluster Spec Errors
    // =========================================================================
    #[error("Invalid cluster spec: {0}")]
    Validation(String),

    #[error("Invalid {kind} service {name}: {reason}")]
    InvalidService {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Can't determine deployment type for [{namespace}] cluster")]
    UnknownDeploymentType { namespace: String },

    #[error("Cluster {field} changed from {previous} to {current}")]
    Incompatible {
        field: String,
        previous: String,
        current: String,
    },

    #[error("Invalid deployment config: {0}")]
    DeploymentConfig(String),

    // =========================================================================
    // Node & Device Errors
    // =========================================================================
    #[error("Can't resolve node '{node}'")]
    NodeNotResolved { node: String },

    #[error("Node '{node}' is NOT valid. Check node status.")]
    NodeNotValid { node: String },

    #[error("Device discovery failed for node {node}: {reason}")]
    Discovery { node: String, reason: String },

    #[error("Failed to create devices config for node {node} cluster {namespace}: {reason}")]
    DevicesConfig {
        node: String,
        namespace: String,
        reason: String,
    },

    #[error("Layout planning failed for node {node}: {reason}")]
    Layout { node: String, reason: String },

    // =========================================================================
    // Reconcile Errors
    // =========================================================================
    #[error("Timed out {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Cluster {namespace} is not known to the operator")]
    UnknownCluster { namespace: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Quantity parse error: {0}")]
    QuantityParse(String),

    #[error("Invalid address {addr}: {reason}")]
    AddressParse { addr: String, reason: String },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Internal(_) => ErrorAction::RequeueWithBackoff,

            // The discovery agent may not have reported yet
            Error::Discovery { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Cluster not yet reconciled - wait for the cluster controller
            Error::UnknownCluster { .. } => ErrorAction::RequeueAfter(Duration::from_secs(10)),

            // Spec, compatibility and parse errors - don't retry automatically
            Error::Configuration(_)
            | Error::Validation(_)
            | Error::InvalidService { .. }
            | Error::UnknownDeploymentType { .. }
            | Error::Incompatible { .. }
            | Error::DeploymentConfig(_)
            | Error::NodeNotResolved { .. }
            | Error::NodeNotValid { .. }
            | Error::DevicesConfig { .. }
            | Error::Layout { .. }
            | Error::Timeout { .. }
            | Error::QuantityParse(_)
            | Error::AddressParse { .. }
            | Error::JsonParse(_)
            | Error::Yaml(_)
            | Error::Regex(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Discovery { .. } | Error::UnknownCluster { .. }
        )
    }

    /// HTTP status code of a Kubernetes API error response, if any
    fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    /// Optimistic concurrency conflict (HTTP 409 with reason Conflict)
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(response)) => {
                response.code == 409 && response.reason != "AlreadyExists"
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ResourceNotFound { .. }) || self.api_code() == Some(404)
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::ResourceExists { .. } => true,
            Error::Kube(kube::Error::Api(response)) => {
                response.code == 409 && response.reason == "AlreadyExists"
            }
            _ => false,
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
