//! Server lifecycle states

use serde::{Deserialize, Serialize};

use super::LifecycleState;

/// Server state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    /// Accepting connections
    Running,
    Stopping,
    Faulted,
}

impl ServerState {
    #[must_use]
    pub fn can_accept_connections(self) -> bool {
        self == Self::Running
    }

    #[must_use]
    pub fn can_start(self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted)
    }

    #[must_use]
    pub fn can_stop(self) -> bool {
        self == Self::Running
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Faulted => "Faulted",
        }
    }
}

impl LifecycleState for ServerState {
    fn can_transition_to(self, next: Self) -> bool {
        use ServerState::{Faulted, Running, Starting, Stopped, Stopping};

        match self {
            Stopped => next == Starting,
            Starting => matches!(next, Running | Faulted),
            Running => matches!(next, Stopping | Faulted),
            Stopping => matches!(next, Stopped | Faulted),
            Faulted => matches!(next, Starting | Stopped),
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
