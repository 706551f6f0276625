use async_trait::async_trait;
use axum::{extract::Request, Router};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{convert::Infallible, net::SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::error::{ListenerError, ServerError};
use crate::listener::{DynListener, Listener};
use crate::metrics::Metrics;
use crate::registry::ConnectionRegistry;
use crate::shutdown::{Completion, ShutdownCoordinator, ShutdownState};
use crate::tracker::ActivityTracker;

pub mod body;
pub mod metrics;
pub mod status;


use body::TrackedBody;

#[derive(Clone, Debug)]
pub struct Dependencies {
    metrics: Metrics,
    coordinator: ShutdownCoordinator<ConnectionHandle>,
}

impl Dependencies {
    pub fn new(metrics: Metrics, coordinator: ShutdownCoordinator<ConnectionHandle>) -> Self {
        Self {
            metrics,
            coordinator,
        }
    }
}

#[derive(Debug)]
struct Acceptor {
    listener: Mutex<Option<TcpListener>>,
    closing: AtomicBool,
    shutdown_token: CancellationToken,
    tasks: TaskTracker,
}

#[async_trait]
impl Listener for Acceptor {
    async fn close(&self) -> Result<(), ListenerError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::NotRunning);
        }
        self.shutdown_token.cancel();
        // never served: drop the socket here
        drop(self.listener.lock().expect("lock not poisoned").take());

        self.tasks.close();
        debug!(tasks = self.tasks.len(), "wait for connection tasks to finish");
        self.tasks.wait().await;
        debug!("listener closed");
        Ok(())
    }
}

/// HTTP server whose shutdown drains connections instead of cutting them.
#[derive(Debug, Clone)]
pub struct Server {
    local_addr: SocketAddr,
    acceptor: Arc<Acceptor>,
    tracker: ActivityTracker<ConnectionHandle>,
    coordinator: ShutdownCoordinator<ConnectionHandle>,
    metrics: Metrics,
}

impl Server {
    pub async fn bind(
        addr: &str,
        grace: Option<Duration>,
        metrics: Metrics,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        debug!(address = %local_addr, grace_ms = ?grace.map(|g| g.as_millis()), "create new server");

        let acceptor = Arc::new(Acceptor {
            listener: Mutex::new(Some(listener)),
            closing: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });
        let registry = Arc::new(ConnectionRegistry::new());
        let tracker = ActivityTracker::new(registry.clone(), metrics.clone());
        let coordinator = ShutdownCoordinator::new(
            registry,
            acceptor.clone() as DynListener,
            grace,
            metrics.clone(),
        );

        Ok(Self {
            local_addr,
            acceptor,
            tracker,
            coordinator,
            metrics,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dependencies(&self) -> Dependencies {
        Dependencies::new(self.metrics.clone(), self.coordinator.clone())
    }

    pub fn serve(&self, router: Router) {
        let Some(listener) = self.acceptor.listener.lock().expect("lock not poisoned").take()
        else {
            warn!(address = %self.local_addr, "server already serving or closed");
            return;
        };
        info!(address = %self.local_addr, "serving on address");

        self.acceptor.tasks.spawn(accept_loop(
            listener,
            router,
            self.tracker.clone(),
            self.acceptor.tasks.clone(),
            self.acceptor.shutdown_token.clone(),
            self.metrics.clone(),
        ));
    }

    pub fn stop<F>(&self, on_complete: F)
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.coordinator.stop(on_complete);
    }

    pub async fn stop_async(&self) -> Completion {
        self.coordinator.stop_async().await
    }

    pub async fn completed(&self) -> Completion {
        self.coordinator.completed().await
    }

    pub fn state(&self) -> ShutdownState {
        self.coordinator.state()
    }

    pub fn pending_connections(&self) -> usize {
        self.coordinator.pending_connections()
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    tracker: ActivityTracker<ConnectionHandle>,
    tasks: TaskTracker,
    shutdown_token: CancellationToken,
    metrics: Metrics,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_token.cancelled() => {
                debug!("shutdown signal received, stopping server");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, remote_addr)) => {
                        let id = ConnectionId::new();
                        let handle = Arc::new(ConnectionHandle::new());
                        metrics.connections.connections_open.inc();
                        if tracker.registry().register(id, handle.clone()) {
                            debug!(connection_id = %id, "accepted while draining, end connection");
                            handle.end_gracefully();
                        }
                        trace!(connection_id = %id, remote = %remote_addr, "accept connection");

                        let closed = Closed {
                            id,
                            registry: tracker.registry().clone(),
                            metrics: metrics.clone(),
                        };
                        tasks.spawn(serve_connection(
                            socket,
                            id,
                            handle,
                            router.clone(),
                            tracker.clone(),
                            closed,
                        ));
                    }
                    Err(e) => {
                        warn!(error = ?e, "fail accept connection");
                    }
                }
            }
        }
    }
    debug!("server stopped accepting connections");
}

async fn serve_connection(
    socket: TcpStream,
    id: ConnectionId,
    handle: Arc<ConnectionHandle>,
    router: Router,
    tracker: ActivityTracker<ConnectionHandle>,
    _closed: Closed,
) {
    let registry = tracker.registry().clone();
    let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
        let in_flight = tracker.start(id);
        let response = router.clone().oneshot(request);
        async move {
            let response = unwrap_infallible(response.await);
            Ok::<_, Infallible>(response.map(|body| TrackedBody::new(body, in_flight)))
        }
    });

    let builder = server::conn::auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(socket), hyper_service);
    tokio::pin!(conn);

    let graceful = handle.graceful_token();
    let destroy = handle.destroy_token();
    let mut ending = false;

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    if ending {
                        debug!(connection_id = %id, err = ?err, "connection ended with error");
                    } else {
                        warn!(connection_id = %id, err = ?err, "fail serve connection");
                    }
                }
                break;
            }
            _ = graceful.cancelled(), if !ending => {
                ending = true;
                conn.as_mut().graceful_shutdown();
                // hyper keeps waiting on a half-read request head
                if registry.in_flight(&id) == Some(0) {
                    trace!(connection_id = %id, "close idle connection");
                    break;
                }
                trace!(connection_id = %id, "end connection gracefully");
            }
            _ = destroy.cancelled() => {
                debug!(connection_id = %id, "destroy connection");
                break;
            }
        }
    }
}

// removes the connection from the registry however its task ends
struct Closed {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry<ConnectionHandle>>,
    metrics: Metrics,
}

impl Drop for Closed {
    fn drop(&mut self) {
        self.metrics.connections.connections_open.dec();
        if let Some(in_flight) = self.registry.remove(&self.id) {
            if in_flight > 0 {
                self.metrics
                    .connections
                    .requests_in_flight
                    .dec_by(in_flight as i64);
            }
        }
    }
}

fn unwrap_infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => match err {},
    }
}

pub fn create_router(deps: Dependencies) -> Router {
    status::create_router(deps.clone()).merge(metrics::create_router(deps))
}
