//! Core types for invocation handling: context and errors.

use nb_protocol::ErrorCode;
use tokio_util::sync::CancellationToken;

/// Context provided to every invocation.
#[derive(Clone, Debug)]
pub struct InvokeContext {
    /// Correlation ID, echoed back in the `invoke_result`.
    pub request_id: String,
    /// Command name as received (e.g. `"camera.snap"`).
    pub command: String,
    pub idempotency_key: String,
    /// Cancelled when the bridge connection drops or the node shuts down.
    pub cancel: CancellationToken,
}

impl InvokeContext {
    /// Context for invoking the runtime directly, outside a bridge session.
    pub fn local(command: impl Into<String>) -> Self {
        Self {
            request_id: String::new(),
            command: command.into(),
            idempotency_key: String::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Errors a capability provider can return.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Hardware or OS failure, permission denied, nothing on screen, ...
    #[error("{0}")]
    Unavailable(String),
    /// The physical resource is held by another session.
    #[error("{0}")]
    Busy(String),
    /// The params were well-formed but the device cannot honor them.
    #[error("{0}")]
    InvalidParams(String),
}

impl ProviderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProviderError::Unavailable(_) => ErrorCode::Unavailable,
            ProviderError::Busy(_) => ErrorCode::Busy,
            ProviderError::InvalidParams(_) => ErrorCode::InvalidRequest,
        }
    }
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum NodeSdkError {
    #[error("config: {0}")]
    Config(String),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("pairing rejected: {0}")]
    PairingRejected(String),
    #[error("pairing revoked")]
    PairingRevoked,
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
