use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionId};
use crate::metrics::Metrics;
use crate::registry::ConnectionRegistry;

/// Counts in-flight requests per connection and closes a connection once
/// its last request finishes while the registry is draining.
#[derive(Debug)]
pub struct ActivityTracker<C> {
    registry: Arc<ConnectionRegistry<C>>,
    metrics: Metrics,
}

impl<C> Clone for ActivityTracker<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<C: Connection> ActivityTracker<C> {
    pub fn new(registry: Arc<ConnectionRegistry<C>>, metrics: Metrics) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<C>> {
        &self.registry
    }

    /// Record a started request. Returns the new counter, or `None` when
    /// the connection is no longer registered.
    pub fn increment(&self, id: &ConnectionId) -> Option<usize> {
        let counter = self.registry.with_entry(id, |entry, _| {
            entry.in_flight += 1;
            entry.in_flight
        })?;
        self.metrics.connections.requests_in_flight.inc();
        trace!(connection_id = %id, in_flight = counter, "request started");
        Some(counter)
    }

    /// Ends the connection when this was its last request while draining.
    pub fn decrement(&self, id: &ConnectionId) -> Option<usize> {
        let (counter, idle) = self.registry.with_entry(id, |entry, draining| {
            if entry.in_flight == 0 {
                return (None, None);
            }
            entry.in_flight -= 1;
            let idle = (draining && entry.in_flight == 0).then(|| entry.connection.clone());
            (Some(entry.in_flight), idle)
        })?;

        let Some(counter) = counter else {
            warn!(connection_id = %id, "request finished with no request in flight");
            return Some(0);
        };

        self.metrics.connections.requests_in_flight.dec();
        trace!(connection_id = %id, in_flight = counter, "request finished");

        if let Some(connection) = idle {
            debug!(connection_id = %id, "last request finished while draining, end connection");
            connection.end_gracefully();
        }
        Some(counter)
    }

    pub fn start(&self, id: ConnectionId) -> InFlight<C> {
        self.increment(&id);
        InFlight {
            tracker: self.clone(),
            id,
        }
    }
}

#[derive(Debug)]
pub struct InFlight<C: Connection> {
    tracker: ActivityTracker<C>,
    id: ConnectionId,
}

impl<C: Connection> Drop for InFlight<C> {
    fn drop(&mut self) {
        self.tracker.decrement(&self.id);
    }
}
