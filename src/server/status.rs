use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tracing::info;

use crate::server::Dependencies;
use crate::shutdown::ShutdownState;

#[derive(Serialize, Debug)]
pub struct ConnectionsStatus {
    pub state: String,
    pub pending: usize,
    pub grace_ms: Option<u64>,
}

async fn ping() -> (StatusCode, &'static str) {
    info!(route = "/ping", method = "GET", "handle request");
    (StatusCode::OK, "pong")
}

async fn ready(State(state): State<Dependencies>) -> (StatusCode, &'static str) {
    info!(route = "/ready", method = "GET", "handle request");
    match state.coordinator.state() {
        ShutdownState::Running => (StatusCode::OK, "ready"),
        ShutdownState::Stopping | ShutdownState::Stopped => {
            (StatusCode::SERVICE_UNAVAILABLE, "stopping")
        }
    }
}

async fn connections(State(state): State<Dependencies>) -> Json<ConnectionsStatus> {
    info!(route = "/connections", method = "GET", "handle request");
    Json(ConnectionsStatus {
        state: state.coordinator.state().to_string(),
        pending: state.coordinator.pending_connections(),
        grace_ms: state.coordinator.grace().map(|g| g.as_millis() as u64),
    })
}

pub fn create_router(deps: Dependencies) -> Router {
    let router: Router = Router::new()
        .route("/ping", get(ping))
        .route("/ready", get(ready))
        .route("/connections", get(connections))
        .with_state(deps);

    router
}
