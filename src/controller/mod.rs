//! Controllers
//!
//! The watch dispatcher, the Cluster reconciler and the adapters that back
//! the domain ports with a live Kubernetes API.

pub mod cluster;
pub mod discovery;
pub mod kube_api;
pub mod labels;
pub mod retry;
pub mod watch;

#[cfg(test)]
pub mod fake;

pub use cluster::{ClusterController, ServiceLauncher, FINALIZER_NAME};
pub use discovery::ConfigMapDiscovery;
pub use kube_api::{KubeClusterApi, KubeServiceLauncher};
pub use retry::FixedInterval;
pub use watch::{Dispatcher, EventHandler};

use crate::crd::DEFAULT_EDGEFS_IMAGE;
use std::time::Duration;

// =============================================================================
// Operator Configuration
// =============================================================================

/// Namespace the operator and the discovery agent run in by default
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "rook-edgefs-system";

/// Poll intervals, timeouts and retry budgets of the controllers
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Where discovery config maps live
    pub operator_namespace: String,
    /// Image used when a cluster names none
    pub default_image: String,
    /// Interval between create attempts of a new cluster
    pub create_interval: Duration,
    /// Give up creating a cluster after this long
    pub create_timeout: Duration,
    pub update_interval: Duration,
    pub update_timeout: Duration,
    /// Attempts for node label patches that hit a conflict
    pub label_retries: usize,
    pub label_retry_delay: Duration,
    /// Attempts for removing the cluster finalizer
    pub finalizer_retries: usize,
    pub finalizer_retry_delay: Duration,
    /// Attempts while waiting for the discovery config maps to appear
    pub discovery_attempts: usize,
    pub discovery_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            default_image: DEFAULT_EDGEFS_IMAGE.to_string(),
            create_interval: Duration::from_secs(6),
            create_timeout: Duration::from_secs(5 * 60),
            update_interval: Duration::from_secs(30),
            update_timeout: Duration::from_secs(60 * 60),
            label_retries: 5,
            label_retry_delay: Duration::from_millis(100),
            finalizer_retries: 5,
            finalizer_retry_delay: Duration::from_secs(5),
            discovery_attempts: 30,
            discovery_interval: Duration::from_secs(5),
        }
    }
}

impl OperatorConfig {
    pub fn create_policy(&self) -> FixedInterval {
        FixedInterval::with_deadline(self.create_interval, self.create_timeout)
    }

    pub fn update_policy(&self) -> FixedInterval {
        FixedInterval::with_deadline(self.update_interval, self.update_timeout)
    }

    pub fn label_policy(&self) -> FixedInterval {
        FixedInterval::with_attempts(self.label_retry_delay, self.label_retries)
    }

    pub fn finalizer_policy(&self) -> FixedInterval {
        FixedInterval::with_attempts(self.finalizer_retry_delay, self.finalizer_retries)
    }

    pub fn discovery_policy(&self) -> FixedInterval {
        FixedInterval::with_attempts(self.discovery_interval, self.discovery_attempts)
    }

    /// Millisecond timings for tests
    #[cfg(test)]
    pub fn fast() -> Self {
        let tick = Duration::from_millis(1);
        Self {
            create_interval: tick,
            create_timeout: Duration::from_millis(50),
            update_interval: tick,
            update_timeout: Duration::from_millis(50),
            label_retry_delay: tick,
            finalizer_retry_delay: tick,
            discovery_interval: tick,
            discovery_attempts: 3,
            ..Default::default()
        }
    }
}
