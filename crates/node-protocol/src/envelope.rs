//! The invocation result envelope and its fixed error-code set.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Every failure a caller can observe from `node.invoke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or unrecognized command/params.  Never retried.
    InvalidRequest,
    /// Capability disabled on the device, or the provider failed.
    Unavailable,
    /// The node has no approved pairing.
    NotPaired,
    /// The node has no live bridge connection.
    NodeOffline,
    /// No response within the bound.  The outcome on the node is unknown.
    Timeout,
    /// Unknown pairing request or node id.
    NotFound,
    /// The physical resource is held by another invocation.
    Busy,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "InvalidRequest",
            ErrorCode::Unavailable => "Unavailable",
            ErrorCode::NotPaired => "NotPaired",
            ErrorCode::NodeOffline => "NodeOffline",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::Busy => "Busy",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{code, message}` carried by a failed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeError {
    pub code: ErrorCode,
    pub message: String,
}

/// Outcome of one invocation, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
}

impl InvocationEnvelope {
    pub fn success(payload: serde_json::Value) -> Self {
        Self {
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Success without a result body (`canvas.hide`, `canvas.a2ui.reset`, ...).
    pub fn empty() -> Self {
        Self {
            ok: true,
            payload: None,
            error: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: None,
            error: Some(InvokeError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Decode the payload into a command-specific shape.  A missing payload
    /// decodes as JSON `null`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone().unwrap_or(serde_json::Value::Null))
    }
}
