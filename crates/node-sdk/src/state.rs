//! Observable connection state of a node.

use tokio::sync::watch;

/// Where the node is in the bridge lifecycle.
///
/// `PendingApproval` nodes never receive invocations; only `Connected` does.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    PendingApproval {
        request_id: String,
    },
    Connected {
        session_id: String,
    },
    /// Terminal: an operator rejected the pairing request or it expired.
    Rejected {
        reason: String,
    },
    /// Terminal: the pairing was revoked while connected.
    Revoked,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

pub(crate) fn channel() -> (watch::Sender<ConnectionState>, watch::Receiver<ConnectionState>) {
    watch::channel(ConnectionState::Disconnected)
}
