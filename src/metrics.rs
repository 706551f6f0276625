use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabel {
    pub outcome: String,
}

#[derive(Default, Debug, Clone)]
pub struct ConnectionMetrics {
    pub connections_open: Gauge,
    pub requests_in_flight: Gauge,
    pub connections_destroyed_total: Counter,
}

#[derive(Default, Debug, Clone)]
pub struct ShutdownMetrics {
    pub shutdowns_total: Family<OutcomeLabel, Counter>,
    pub state: Gauge,
}

#[derive(Default, Debug, Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub connections: ConnectionMetrics,
    pub shutdown: ShutdownMetrics,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let connections = ConnectionMetrics::default();
        let shutdown = ShutdownMetrics::default();

        registry.register(
            "stoppable_connections_open",
            "Currently registered connections",
            connections.connections_open.clone(),
        );
        registry.register(
            "stoppable_requests_in_flight",
            "Requests started but not yet finished",
            connections.requests_in_flight.clone(),
        );
        registry.register(
            "stoppable_connections_destroyed",
            "Connections forcibly destroyed after the grace period",
            connections.connections_destroyed_total.clone(),
        );
        registry.register(
            "stoppable_shutdowns",
            "Completed shutdowns by outcome",
            shutdown.shutdowns_total.clone(),
        );
        registry.register(
            "stoppable_shutdown_state",
            "Shutdown state: 0 running, 1 stopping, 2 stopped",
            shutdown.state.clone(),
        );

        Metrics {
            registry: Arc::new(registry),
            connections,
            shutdown,
        }
    }

    pub fn record_shutdown(&self, outcome: &str) {
        self.shutdown
            .shutdowns_total
            .get_or_create(&OutcomeLabel {
                outcome: outcome.to_string(),
            })
            .inc();
    }
}

pub const OUTCOME_GRACEFUL: &str = "graceful";
pub const OUTCOME_FORCED: &str = "forced";
pub const OUTCOME_FAILED: &str = "failed";
