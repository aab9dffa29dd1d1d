//! Client lifecycle states

use serde::{Deserialize, Serialize};

use super::LifecycleState;

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ClientState {
    /// No connection attempt made, or the last one ended cleanly
    #[default]
    Disconnected,
    /// Connect attempt in progress
    Connecting,
    /// Connected and ready to send/receive
    Connected,
    /// Closing the connection
    Disconnecting,
    /// Waiting to retry a failed connect attempt
    Reconnecting,
    /// Connection lost or never established because of an error
    Faulted,
    /// Client disposed; absorbing
    Disposed,
}

impl ClientState {
    #[must_use]
    pub fn can_send(self) -> bool {
        self == Self::Connected
    }

    #[must_use]
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Faulted)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Faulted | Self::Disposed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
            Self::Reconnecting => "Reconnecting",
            Self::Faulted => "Faulted",
            Self::Disposed => "Disposed",
        }
    }
}

impl LifecycleState for ClientState {
    fn can_transition_to(self, next: Self) -> bool {
        use ClientState::{
            Connected, Connecting, Disconnected, Disconnecting, Disposed, Faulted, Reconnecting,
        };

        match self {
            Disconnected => matches!(next, Connecting | Disconnecting | Disposed),
            Connecting => matches!(
                next,
                Connected | Reconnecting | Faulted | Disconnecting | Disposed
            ),
            Reconnecting => matches!(
                next,
                Connected | Reconnecting | Faulted | Disconnecting | Disposed
            ),
            Connected => matches!(next, Disconnecting | Disconnected | Faulted | Disposed),
            Disconnecting => matches!(next, Disconnected | Faulted | Disposed),
            Faulted => matches!(next, Connecting | Disconnecting | Disconnected | Disposed),
            Disposed => false,
        }
    }

    fn is_absorbing(self) -> bool {
        self == Self::Disposed
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
