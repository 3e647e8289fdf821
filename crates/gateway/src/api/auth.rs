//! Operator bearer-token middleware for the RPC and REST surface.
//!
//! The token comes from the env var named by `server.api_token_env` and is
//! hashed once in `bootstrap::build_app_state`.  With no token configured
//! the operator routes are open.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token_hash.as_deref() else {
        return next.run(req).await;
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if bool::from(Sha256::digest(presented.as_bytes()).ct_eq(expected)) {
        return next.run(req).await;
    }

    tracing::warn!(
        method = %req.method(),
        path = %req.uri().path(),
        "operator request rejected: bad or missing bearer token"
    );
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "ok": false,
            "error": { "code": "Unauthorized", "message": "invalid or missing API token" },
        })),
    )
        .into_response()
}
