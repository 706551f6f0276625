use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::ShutdownError;
use crate::listener::DynListener;
use crate::metrics::{self, Metrics};
use crate::registry::ConnectionRegistry;

#[cfg(test)]
mod tests;

/// `Ok(gracefully)` or the failure that ended the stop sequence.
pub type Completion = Result<bool, ShutdownError>;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Stopping,
    Stopped,
}

struct Inner<C> {
    registry: Arc<ConnectionRegistry<C>>,
    listener: DynListener,
    grace: Option<Duration>,
    metrics: Metrics,
    state: Mutex<ShutdownState>,
    requested: AtomicBool,
    gracefully: AtomicBool,
    completion: watch::Sender<Option<Completion>>,
}

pub struct ShutdownCoordinator<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for ShutdownCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connection> fmt::Debug for ShutdownCoordinator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("grace", &self.inner.grace)
            .field("pending", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl<C: Connection> ShutdownCoordinator<C> {
    pub fn new(
        registry: Arc<ConnectionRegistry<C>>,
        listener: DynListener,
        grace: Option<Duration>,
        metrics: Metrics,
    ) -> Self {
        debug!(grace_ms = ?grace.map(|g| g.as_millis()), "create shutdown coordinator");
        let (completion, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                registry,
                listener,
                grace,
                metrics,
                state: Mutex::new(ShutdownState::Running),
                requested: AtomicBool::new(false),
                gracefully: AtomicBool::new(true),
                completion,
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.inner.state.lock().expect("lock not poisoned")
    }

    pub fn grace(&self) -> Option<Duration> {
        self.inner.grace
    }

    pub fn pending_connections(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn outcome(&self) -> Option<Completion> {
        self.inner.completion.borrow().clone()
    }

    /// Must be called from within a tokio runtime. A second call reports
    /// [`ShutdownError::NotRunning`].
    pub fn stop<F>(&self, on_complete: F)
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            debug!(state = %self.state(), "stop requested while not running");
            tokio::spawn(async move { on_complete(Err(ShutdownError::NotRunning)) });
            return;
        }

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.run().await;
            on_complete(coordinator.completed().await);
        });
    }

    pub async fn stop_async(&self) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.stop(move |completion| {
            let _ = tx.send(completion);
        });
        rx.await.unwrap_or(Err(ShutdownError::Interrupted))
    }

    pub async fn completed(&self) -> Completion {
        let mut rx = self.inner.completion.subscribe();
        let completion = match rx.wait_for(Option::is_some).await {
            Ok(completion) => completion.clone(),
            Err(_) => None,
        };
        completion.unwrap_or(Err(ShutdownError::Interrupted))
    }

    async fn run(&self) {
        // let request-finished events already queued see the running state
        tokio::task::yield_now().await;

        self.set_state(ShutdownState::Stopping);
        self.inner.registry.start_draining();
        info!(
            grace_ms = ?self.inner.grace.map(|g| g.as_millis()),
            pending = self.inner.registry.len(),
            "start graceful shutdown"
        );

        let timer = self.arm_grace_timer();
        let closing = self.inner.listener.close();
        self.end_idle();
        let result = closing.await;

        if let Some(timer) = timer {
            timer.abort();
        }
        self.set_state(ShutdownState::Stopped);

        let gracefully = self.inner.gracefully.load(Ordering::SeqCst);
        let completion = match result {
            Ok(()) => {
                let outcome = if gracefully {
                    metrics::OUTCOME_GRACEFUL
                } else {
                    metrics::OUTCOME_FORCED
                };
                self.inner.metrics.record_shutdown(outcome);
                info!(gracefully = gracefully, "shutdown complete");
                Ok(gracefully)
            }
            Err(e) => {
                self.inner.metrics.record_shutdown(metrics::OUTCOME_FAILED);
                warn!(error = %e, "listener close failed during shutdown");
                Err(ShutdownError::from(e))
            }
        };
        self.inner.completion.send_replace(Some(completion));
    }

    fn set_state(&self, state: ShutdownState) {
        let mut current = self.inner.state.lock().expect("lock not poisoned");
        let previous = *current;
        debug!(from = %previous, to = %state, "shutdown state transition");
        *current = state;
        let level = match state {
            ShutdownState::Running => 0,
            ShutdownState::Stopping => 1,
            ShutdownState::Stopped => 2,
        };
        self.inner.metrics.shutdown.state.set(level);
    }

    fn arm_grace_timer(&self) -> Option<JoinHandle<()>> {
        let grace = self.inner.grace?;
        let coordinator = self.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            coordinator.force_terminate().await;
        }))
    }

    fn end_idle(&self) {
        let mut ended = 0;
        self.inner.registry.for_each(|id, in_flight, connection| {
            if in_flight == 0 {
                debug!(connection_id = %id, "end idle connection");
                connection.end_gracefully();
                ended += 1;
            }
        });
        debug!(ended = ended, "idle sweep done");
    }

    async fn force_terminate(&self) {
        self.inner.gracefully.store(false, Ordering::SeqCst);
        warn!(
            pending = self.inner.registry.len(),
            "grace period elapsed, force close connections"
        );

        self.inner
            .registry
            .for_each(|_, _, connection| connection.end_gracefully());

        tokio::task::yield_now().await;

        self.inner.registry.for_each(|id, in_flight, connection| {
            warn!(connection_id = %id, in_flight = in_flight, "destroy connection");
            connection.destroy_now();
            self.inner
                .metrics
                .connections
                .connections_destroyed_total
                .inc();
        });
    }
}
