use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// GET /health: liveness plus node counters.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": nb_protocol::PROTOCOL_VERSION,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "nodes": {
            "connected": state.connections.len(),
            "paired": state.pairing.list_paired().len(),
            "pending": state.pairing.list_pending().len(),
        },
        "invocationsInFlight": state.router.pending_count(),
    }))
}
