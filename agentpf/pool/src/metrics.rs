use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Describes the pool's connections and watch activity.
#[derive(Clone, Debug, Default)]
pub struct PoolMetrics {
    pub(crate) handles: Gauge,
    pub(crate) connects: Counter,
    pub(crate) connect_failures: Counter,
    pub(crate) evictions: Counter,
    pub(crate) updates: Counter,
    pub(crate) watch_retries: Counter,
}

// === impl PoolMetrics ===

impl PoolMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "handles",
            "Number of agent connections held by the pool",
            metrics.handles.clone(),
        );
        reg.register(
            "connects",
            "Total number of agent connections established",
            metrics.connects.clone(),
        );
        reg.register(
            "connect_failures",
            "Total number of agent connection attempts that failed",
            metrics.connect_failures.clone(),
        );
        reg.register(
            "evictions",
            "Total number of idle agent connections closed by the pool",
            metrics.evictions.clone(),
        );
        reg.register(
            "updates",
            "Total number of agent snapshots received from the manager",
            metrics.updates.clone(),
        );
        reg.register(
            "watch_retries",
            "Total number of times the agent watch was re-established after the manager was unavailable",
            metrics.watch_retries.clone(),
        );
        metrics
    }
}
