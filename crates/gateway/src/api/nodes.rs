//! Node REST endpoints.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde_json::Value;

use nb_protocol::ErrorCode;

use super::methods::{self, ApiError};
use crate::nodes::router::InvokeRequest;
use crate::state::AppState;

/// GET /v1/nodes
pub async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    Json(methods::node_list(&state))
}

/// GET /v1/nodes/:node_id
pub async fn describe_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(methods::node_describe(&state, &node_id)?))
}

/// GET /v1/nodes/pairing
pub async fn list_pairing(State(state): State<AppState>) -> impl IntoResponse {
    Json(methods::pair_list(&state))
}

/// POST /v1/nodes/pairing/:request_id/approve
///
/// The response is the only place the plaintext token ever appears.
pub async fn approve_pairing(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(methods::pair_approve(&state, &request_id)?))
}

/// POST /v1/nodes/pairing/:request_id/reject
pub async fn reject_pairing(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    methods::pair_reject(&state, &request_id)?;
    Ok(Json(serde_json::json!({ "rejected": request_id })))
}

/// DELETE /v1/nodes/:node_id/pairing
pub async fn revoke_pairing(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(methods::pair_revoke(&state, &node_id)?))
}

/// POST /v1/nodes/invoke: always 200 once the body parses; the outcome
/// is the envelope.
pub async fn invoke(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: InvokeRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::new(ErrorCode::InvalidRequest, e.to_string()))?;
    Ok(Json(methods::node_invoke(&state, req).await))
}
