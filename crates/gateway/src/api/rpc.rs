//! `POST /v1/rpc`: method-dispatch surface for CLI and internal clients.
//!
//! Request `{method, params}`; response `{ok:true, result}` or
//! `{ok:false, error:{code, message}}`, always with HTTP 200.

use axum::extract::State;
use axum::response::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nb_protocol::{ErrorCode, InvokeError};

use super::methods::{self, ApiError};
use crate::nodes::router::InvokeRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
}

impl RpcResponse {
    fn success(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(v) => Self {
                ok: true,
                result: Some(v),
                error: None,
            },
            Err(e) => Self::failure(ApiError::new(ErrorCode::Unavailable, e.to_string())),
        }
    }

    fn failure(err: ApiError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(err.0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeIdParams {
    node_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestIdParams {
    request_id: String,
}

fn params<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, ApiError> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    };
    serde_json::from_value(value)
        .map_err(|e| ApiError::new(ErrorCode::InvalidRequest, format!("{method}: {e}")))
}

/// POST /v1/rpc
pub async fn rpc(State(state): State<AppState>, Json(req): Json<RpcRequest>) -> Json<RpcResponse> {
    tracing::debug!(method = %req.method, "rpc call");
    Json(dispatch(&state, req).await)
}

async fn dispatch(state: &AppState, req: RpcRequest) -> RpcResponse {
    let method = req.method.as_str();
    let outcome: Result<RpcResponse, ApiError> = match method {
        "node.list" => Ok(RpcResponse::success(methods::node_list(state))),
        "node.describe" => params::<NodeIdParams>(method, req.params)
            .and_then(|p| methods::node_describe(state, &p.node_id))
            .map(RpcResponse::success),
        "node.pair.list" => Ok(RpcResponse::success(methods::pair_list(state))),
        "node.pair.approve" => params::<RequestIdParams>(method, req.params)
            .and_then(|p| methods::pair_approve(state, &p.request_id))
            .map(RpcResponse::success),
        "node.pair.reject" => params::<RequestIdParams>(method, req.params)
            .and_then(|p| methods::pair_reject(state, &p.request_id))
            .map(|()| RpcResponse::success(Value::Null)),
        "node.pair.revoke" => params::<NodeIdParams>(method, req.params)
            .and_then(|p| methods::pair_revoke(state, &p.node_id))
            .map(RpcResponse::success),
        "node.invoke" => match params::<InvokeRequest>(method, req.params) {
            Ok(invoke) => {
                let envelope = methods::node_invoke(state, invoke).await;
                match envelope.error {
                    Some(error) if !envelope.ok => Err(ApiError(error)),
                    _ => Ok(RpcResponse::success(serde_json::json!({
                        "payload": envelope.payload,
                    }))),
                }
            }
            Err(e) => Err(e),
        },
        other => Err(ApiError::new(
            ErrorCode::InvalidRequest,
            format!("unknown method: {other}"),
        )),
    };
    outcome.unwrap_or_else(RpcResponse::failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::build_app_state;
    use nb_domain::config::Config;
    use nb_protocol::NodeInfo;
    use std::sync::Arc;

    fn state() -> AppState {
        build_app_state(Arc::new(Config::default())).unwrap()
    }

    async fn call(state: &AppState, method: &str, params: Value) -> RpcResponse {
        dispatch(
            state,
            RpcRequest {
                method: method.into(),
                params,
            },
        )
        .await
    }

    fn code(resp: &RpcResponse) -> Option<ErrorCode> {
        resp.error.as_ref().map(|e| e.code)
    }

    fn request_pairing(state: &AppState, node_id: &str) -> String {
        let info = NodeInfo {
            node_id: node_id.into(),
            ..Default::default()
        };
        match state.pairing.request_pairing(info, None, None).unwrap() {
            crate::nodes::pairing::PairingOutcome::Pending(r) => r.request_id,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_invalid_request() {
        let resp = call(&state(), "node.reboot", Value::Null).await;
        assert!(!resp.ok);
        assert_eq!(code(&resp), Some(ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn approve_round_trip_through_pair_list() {
        let state = state();
        let request_id = request_pairing(&state, "n1");

        let listed = call(&state, "node.pair.list", Value::Null).await;
        assert_eq!(listed.result.as_ref().unwrap()["pending"][0]["requestId"], request_id.as_str());

        let approved = call(&state, "node.pair.approve", serde_json::json!({ "requestId": request_id })).await;
        assert!(approved.ok);
        let result = approved.result.unwrap();
        assert_eq!(result["nodeId"], "n1");
        assert!(result["token"].is_string());
        assert!(result.get("tokenHash").is_none());

        let listed = call(&state, "node.pair.list", Value::Null).await.result.unwrap();
        assert_eq!(listed["pending"].as_array().unwrap().len(), 0);
        assert_eq!(listed["paired"][0]["nodeId"], "n1");

        let rejected = call(&state, "node.pair.reject", serde_json::json!({ "requestId": request_id })).await;
        assert_eq!(code(&rejected), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn missing_params_are_invalid_request() {
        let resp = call(&state(), "node.pair.approve", Value::Null).await;
        assert_eq!(code(&resp), Some(ErrorCode::InvalidRequest));
    }

    #[tokio::test]
    async fn describe_unknown_is_not_found() {
        let resp = call(&state(), "node.describe", serde_json::json!({ "nodeId": "ghost" })).await;
        assert_eq!(code(&resp), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn invoke_unpaired_surfaces_envelope_error() {
        let resp = call(
            &state(),
            "node.invoke",
            serde_json::json!({
                "nodeId": "ghost",
                "command": "camera.snap",
                "idempotencyKey": "k1",
            }),
        )
        .await;
        assert!(!resp.ok);
        assert_eq!(code(&resp), Some(ErrorCode::NotPaired));
    }

    #[tokio::test]
    async fn revoke_removes_pairing() {
        let state = state();
        let request_id = request_pairing(&state, "n1");
        state.pairing.approve(&request_id).unwrap();

        let resp = call(&state, "node.pair.revoke", serde_json::json!({ "nodeId": "n1" })).await;
        assert!(resp.ok);
        assert!(!state.pairing.is_paired("n1"));
        let list = call(&state, "node.list", Value::Null).await.result.unwrap();
        assert_eq!(list["nodes"].as_array().unwrap().len(), 0);
    }
}
