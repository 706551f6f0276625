use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::time::Instant;

use super::{ShutdownCoordinator, ShutdownState};
use crate::connection::{Connection, ConnectionId};
use crate::error::{ListenerError, ShutdownError, ERR_SERVER_NOT_RUNNING};
use crate::listener::Listener;
use crate::metrics::Metrics;
use crate::registry::ConnectionRegistry;
use crate::tracker::ActivityTracker;

type Registry = ConnectionRegistry<MockConnection>;

// ending closes it unless stuck, destroying always does
#[derive(Debug)]
struct MockConnection {
    id: ConnectionId,
    stuck: bool,
    registry: Weak<Registry>,
    ended: AtomicUsize,
    destroyed: AtomicBool,
}

impl MockConnection {
    fn close(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }

    fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }

    fn destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn end_gracefully(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
        if !self.stuck {
            self.close();
        }
    }

    fn destroy_now(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.close();
    }
}

#[derive(Debug)]
struct MockListener {
    registry: Arc<Registry>,
    closed: AtomicBool,
    failure: Mutex<Option<ListenerError>>,
}

#[async_trait]
impl Listener for MockListener {
    async fn close(&self) -> Result<(), ListenerError> {
        if let Some(err) = self.failure.lock().unwrap().take() {
            return Err(err);
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::NotRunning);
        }
        while !self.registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }
}

struct Harness {
    registry: Arc<Registry>,
    listener: Arc<MockListener>,
    tracker: ActivityTracker<MockConnection>,
    coordinator: ShutdownCoordinator<MockConnection>,
}

impl Harness {
    fn new(grace: Option<Duration>) -> Self {
        let registry = Arc::new(Registry::new());
        let listener = Arc::new(MockListener {
            registry: registry.clone(),
            closed: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        let metrics = Metrics::new();
        let tracker = ActivityTracker::new(registry.clone(), metrics.clone());
        let coordinator =
            ShutdownCoordinator::new(registry.clone(), listener.clone(), grace, metrics);
        Self {
            registry,
            listener,
            tracker,
            coordinator,
        }
    }

    fn connect(&self, stuck: bool) -> Arc<MockConnection> {
        let id = ConnectionId::new();
        let connection = Arc::new(MockConnection {
            id,
            stuck,
            registry: Arc::downgrade(&self.registry),
            ended: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        });
        self.registry.register(id, connection.clone());
        connection
    }
}

#[tokio::test]
async fn test_idle_connections_end_on_stop() {
    let harness = Harness::new(None);
    let first = harness.connect(false);
    let second = harness.connect(false);

    let result = harness.coordinator.stop_async().await;

    assert!(matches!(result, Ok(true)));
    assert_eq!(first.ended(), 1);
    assert_eq!(second.ended(), 1);
    assert!(!first.destroyed());
    assert!(!second.destroyed());
    assert_eq!(harness.coordinator.pending_connections(), 0);
    assert_eq!(harness.coordinator.state(), ShutdownState::Stopped);
}

#[tokio::test]
async fn test_flip_is_deferred_past_current_turn() {
    let harness = Harness::new(None);
    let connection = harness.connect(false);
    harness.tracker.increment(&connection.id);

    harness.coordinator.stop(|_| {});
    assert_eq!(harness.coordinator.state(), ShutdownState::Running);
    assert!(!harness.registry.is_draining());

    // a request finishing in the same turn as stop() sees the running state
    harness.tracker.decrement(&connection.id);
    assert_eq!(connection.ended(), 0);

    let result = harness.coordinator.completed().await;
    assert!(matches!(result, Ok(true)));
    assert_eq!(connection.ended(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_busy_connection_waits_for_last_request() {
    let harness = Harness::new(None);
    let busy = harness.connect(false);
    harness.tracker.increment(&busy.id);
    harness.tracker.increment(&busy.id);

    let coordinator = harness.coordinator.clone();
    let stopping = tokio::spawn(async move { coordinator.stop_async().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.coordinator.state(), ShutdownState::Stopping);
    assert_eq!(busy.ended(), 0);

    harness.tracker.decrement(&busy.id);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(busy.ended(), 0);

    harness.tracker.decrement(&busy.id);
    let result = stopping.await.unwrap();

    assert!(matches!(result, Ok(true)));
    assert_eq!(busy.ended(), 1);
    assert!(harness.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_grace_deadline_destroys_stuck_connection() {
    let harness = Harness::new(Some(Duration::from_millis(500)));
    let idle = harness.connect(false);
    let stuck = harness.connect(true);
    harness.tracker.increment(&stuck.id);

    let start = Instant::now();
    let result = harness.coordinator.stop_async().await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Ok(false)));
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(550));
    assert_eq!(idle.ended(), 1);
    assert!(!idle.destroyed());
    assert!(stuck.ended() >= 1);
    assert!(stuck.destroyed());
    assert!(harness.registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_force_skips_connections_that_closed_on_end() {
    let harness = Harness::new(Some(Duration::from_millis(200)));
    let polite = harness.connect(false);
    let stuck = harness.connect(true);
    harness.tracker.increment(&polite.id);
    harness.tracker.increment(&stuck.id);

    let result = harness.coordinator.stop_async().await;

    assert!(matches!(result, Ok(false)));
    assert_eq!(polite.ended(), 1);
    assert!(!polite.destroyed());
    assert!(stuck.destroyed());
}

#[tokio::test(start_paused = true)]
async fn test_finishing_before_deadline_is_graceful() {
    let harness = Harness::new(Some(Duration::from_millis(500)));
    let busy = harness.connect(false);
    harness.tracker.increment(&busy.id);

    let tracker = harness.tracker.clone();
    let id = busy.id;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        tracker.decrement(&id);
    });

    let start = Instant::now();
    let result = harness.coordinator.stop_async().await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Ok(true)));
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(500));
    assert!(!busy.destroyed());

    // the aborted timer must not flip the outcome afterwards
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(matches!(harness.coordinator.outcome(), Some(Ok(true))));
}

#[tokio::test]
async fn test_second_stop_reports_not_running() {
    let harness = Harness::new(None);
    let idle = harness.connect(false);

    assert!(matches!(harness.coordinator.stop_async().await, Ok(true)));
    assert_eq!(idle.ended(), 1);

    let late = harness.connect(false);
    let err = harness.coordinator.stop_async().await.unwrap_err();

    assert!(matches!(err, ShutdownError::NotRunning));
    assert_eq!(err.kind(), ERR_SERVER_NOT_RUNNING);
    assert_eq!(late.ended(), 0);
    assert_eq!(harness.coordinator.state(), ShutdownState::Stopped);
}

#[tokio::test]
async fn test_callback_fires_once_per_stop() {
    let harness = Harness::new(None);
    harness.connect(false);

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let counter = calls.clone();
    harness.coordinator.stop(move |completion| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(completion);
    });

    assert!(matches!(rx.await.unwrap(), Ok(true)));
    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_observers_share_one_outcome() {
    let harness = Harness::new(None);
    harness.connect(false);

    let observer = harness.coordinator.clone();
    let watching = tokio::spawn(async move { observer.completed().await });

    let stopped = harness.coordinator.stop_async().await;
    let observed = watching.await.unwrap();

    assert!(matches!(stopped, Ok(true)));
    assert!(matches!(observed, Ok(true)));
    assert!(matches!(harness.coordinator.outcome(), Some(Ok(true))));
}

#[tokio::test]
async fn test_listener_not_running_is_reported() {
    let harness = Harness::new(None);
    let idle = harness.connect(false);
    harness.listener.closed.store(true, Ordering::SeqCst);

    let err = harness.coordinator.stop_async().await.unwrap_err();

    assert!(err.is_not_running());
    assert_eq!(harness.coordinator.state(), ShutdownState::Stopped);
    // no rollback of the idle sweep
    assert_eq!(idle.ended(), 1);
}

#[tokio::test]
async fn test_listener_failure_is_propagated() {
    let harness = Harness::new(None);
    *harness.listener.failure.lock().unwrap() = Some(ListenerError::from(io::Error::other("close failed")));

    let err = harness.coordinator.stop_async().await.unwrap_err();

    match err {
        ShutdownError::Listener(ListenerError::Io(inner)) => {
            assert_eq!(inner.to_string(), "close failed");
        }
        other => panic!("expected listener io error, got {other:?}"),
    }
    assert!(!harness.coordinator.outcome().unwrap().is_ok());
}

struct PanickingListener;

#[async_trait]
impl Listener for PanickingListener {
    async fn close(&self) -> Result<(), ListenerError> {
        panic!("listener close panicked");
    }
}

#[tokio::test]
async fn test_stop_task_panic_is_not_reported_as_not_running() {
    let registry = Arc::new(Registry::new());
    let metrics = Metrics::new();
    let coordinator = ShutdownCoordinator::new(
        registry,
        Arc::new(PanickingListener),
        None,
        metrics.clone(),
    );

    let err = coordinator.stop_async().await.unwrap_err();

    assert!(matches!(err, ShutdownError::Interrupted));
    assert!(!err.is_not_running());
    assert_eq!(err.kind(), "ERR_SHUTDOWN_INTERRUPTED");
    assert_eq!(metrics.shutdown.state.get(), 1);
}

#[tokio::test]
async fn test_state_gauge_follows_transitions() {
    let harness = Harness::new(None);
    let metrics = harness.coordinator.inner.metrics.clone();
    assert_eq!(metrics.shutdown.state.get(), 0);

    assert!(matches!(harness.coordinator.stop_async().await, Ok(true)));
    assert_eq!(metrics.shutdown.state.get(), 2);
}
