//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One websocket endpoint at `/ws` carries all relay traffic. `/healthz`
//! answers liveness probes and `relay-cli ping`.

pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Path of the relay websocket endpoint.
pub const WS_PATH: &str = "/ws";

pub fn app(state: AppState) -> Router {
    Router::new()
        .route(WS_PATH, get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await, StatusCode::OK);
    }
}
