//! Connection lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle of a link as observed through its watch channel
///
/// `Connecting -> Connected -> (Reconnecting <-> Connected) -> Disconnected`.
/// Disconnected is sticky: it is only left by an explicit
/// [`reconnect`](crate::HubLink::reconnect) call, never on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum LinkState {
    /// Connection attempt in flight, no session established yet
    Connecting,
    Connected,
    /// Unexpected close; a retry is scheduled
    Reconnecting { attempt: u32 },
    /// Retry budget spent or explicitly shut down
    Disconnected { reason: String },
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, LinkState::Disconnected { .. })
    }
}
