//! Operations behind the `node.*` RPC methods and their REST mirrors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use nb_protocol::{ErrorCode, InvocationEnvelope, InvokeError};

use crate::nodes::directory::{self, NodeEntry, NodeList};
use crate::nodes::pairing::{ApprovedNode, PairedNode, PairingError, PendingPairingRequest};
use crate::nodes::router::InvokeRequest;
use crate::state::AppState;

/// A failed operation, carrying the same `{code, message}` as envelopes.
#[derive(Debug, Clone)]
pub struct ApiError(pub InvokeError);

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self(InvokeError {
            code,
            message: message.into(),
        })
    }

    pub fn status(&self) -> StatusCode {
        match self.0.code {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::NotPaired => StatusCode::FORBIDDEN,
            ErrorCode::Busy => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::NodeOffline | ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<PairingError> for ApiError {
    fn from(e: PairingError) -> Self {
        let code = match &e {
            PairingError::NotFound(_) => ErrorCode::NotFound,
            PairingError::LimitReached(_) | PairingError::Persist(_) => ErrorCode::Unavailable,
        };
        Self::new(code, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(serde_json::json!({ "error": self.0 }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct PairList {
    pub pending: Vec<PendingPairingRequest>,
    pub paired: Vec<PairedNode>,
}

pub fn node_list(state: &AppState) -> NodeList {
    directory::list(&state.pairing, &state.connections)
}

pub fn node_describe(state: &AppState, node_id: &str) -> Result<NodeEntry, ApiError> {
    directory::describe(&state.pairing, &state.connections, node_id)
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("unknown node: {node_id}")))
}

pub fn pair_list(state: &AppState) -> PairList {
    PairList {
        pending: state.pairing.list_pending(),
        paired: state.pairing.list_paired(),
    }
}

pub fn pair_approve(state: &AppState, request_id: &str) -> Result<ApprovedNode, ApiError> {
    Ok(state.pairing.approve(request_id)?)
}

pub fn pair_reject(state: &AppState, request_id: &str) -> Result<(), ApiError> {
    Ok(state.pairing.reject(request_id)?)
}

/// Delete the pairing and drop the node's live session, if any.
pub fn pair_revoke(state: &AppState, node_id: &str) -> Result<PairedNode, ApiError> {
    let paired = state.pairing.revoke(node_id)?;
    state.connections.disconnect(node_id);
    Ok(paired)
}

pub async fn node_invoke(state: &AppState, req: InvokeRequest) -> InvocationEnvelope {
    state.router.invoke(req).await
}
