pub mod auth;
pub mod health;
pub mod methods;
pub mod nodes;
pub mod rpc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (health, the bridge socket which has its
/// own admission and pairing checks) and **protected** (gated behind the
/// operator bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/v1/nodes/ws", get(crate::nodes::ws::node_ws));

    let protected = Router::new()
        // RPC
        .route("/v1/rpc", post(rpc::rpc))
        // Directory
        .route("/v1/nodes", get(nodes::list_nodes))
        .route("/v1/nodes/:node_id", get(nodes::describe_node))
        // Pairing
        .route("/v1/nodes/pairing", get(nodes::list_pairing))
        .route(
            "/v1/nodes/pairing/:request_id/approve",
            post(nodes::approve_pairing),
        )
        .route(
            "/v1/nodes/pairing/:request_id/reject",
            post(nodes::reject_pairing),
        )
        .route("/v1/nodes/:node_id/pairing", delete(nodes::revoke_pairing))
        // Invocation
        .route("/v1/nodes/invoke", post(nodes::invoke))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}
