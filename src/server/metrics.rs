use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus_client::encoding::text::encode;
use tracing::{info, warn};

use crate::server::Dependencies;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

async fn metrics(State(state): State<Dependencies>) -> impl IntoResponse {
    info!(
        route = "/metrics",
        method = "GET",
        state = %state.coordinator.state(),
        "handle request"
    );

    let mut body = String::new();
    if let Err(e) = encode(&mut body, &state.metrics.registry) {
        warn!(error = ?e, "fail encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

pub fn create_router(deps: Dependencies) -> Router {
    Router::new().route("/metrics", get(metrics)).with_state(deps)
}
