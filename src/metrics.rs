//! Operator Metrics
//!
//! Prometheus collectors registered once in the default registry and
//! served by the `/metrics` endpoint of the binary.

use prometheus::{IntCounterVec, IntGaugeVec, Opts};
use std::sync::OnceLock;
use tracing::warn;

/// Outcome label of a reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Skipped,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Skipped => "skipped",
            Outcome::Failure => "failure",
        }
    }
}

pub struct OperatorMetrics {
    /// Reconciliations by resource kind and outcome
    pub reconciliations: IntCounterVec,
    /// Cluster state transitions by namespace and new state
    pub state_transitions: IntCounterVec,
    /// Nodes in the last deployment plan per cluster namespace
    pub planned_nodes: IntGaugeVec,
}

impl OperatorMetrics {
    fn new() -> prometheus::Result<Self> {
        let reconciliations = IntCounterVec::new(
            Opts::new("edgefs_operator_reconciliations_total", "Reconciliations by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let state_transitions = IntCounterVec::new(
            Opts::new("edgefs_operator_cluster_state_transitions_total", "Cluster state transitions"),
            &["namespace", "state"],
        )?;
        let planned_nodes = IntGaugeVec::new(
            Opts::new("edgefs_operator_planned_nodes", "Nodes in the last deployment plan"),
            &["namespace"],
        )?;

        let registry = prometheus::default_registry();
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(state_transitions.clone()))?;
        registry.register(Box::new(planned_nodes.clone()))?;

        Ok(Self {
            reconciliations,
            state_transitions,
            planned_nodes,
        })
    }
}

static METRICS: OnceLock<Option<OperatorMetrics>> = OnceLock::new();

/// Registered collectors; `None` when registration failed
pub fn metrics() -> Option<&'static OperatorMetrics> {
    METRICS
        .get_or_init(|| match OperatorMetrics::new() {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Failed to register operator metrics: {}", e);
                None
            }
        })
        .as_ref()
}

pub fn record_reconcile(kind: &str, outcome: Outcome) {
    if let Some(m) = metrics() {
        m.reconciliations
            .with_label_values(&[kind, outcome.as_str()])
            .inc();
    }
}

pub fn record_state(namespace: &str, state: &str) {
    if let Some(m) = metrics() {
        m.state_transitions
            .with_label_values(&[namespace, state])
            .inc();
    }
}

pub fn set_planned_nodes(namespace: &str, nodes: usize) {
    if let Some(m) = metrics() {
        m.planned_nodes
            .with_label_values(&[namespace])
            .set(nodes as i64);
    }
}

/// Drop per-cluster series once the cluster is gone
pub fn forget_cluster(namespace: &str) {
    if let Some(m) = metrics() {
        let _ = m.planned_nodes.remove_label_values(&[namespace]);
    }
}
