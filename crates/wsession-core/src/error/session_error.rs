//! Session errors - error taxonomy shared by client and server managers

use thiserror::Error;

use crate::transport::TransportState;

/// Failures reported by a message transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Peer went away without completing the close handshake
    #[error("Connection closed prematurely")]
    ClosedPrematurely,

    #[error("Transport is not open (state: {0})")]
    NotOpen(TransportState),

    #[error("Connection attempt failed: {0}")]
    Connect(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether the peer simply vanished. Callers treat this as a normal
    /// termination rather than a fault.
    #[must_use]
    pub fn is_premature_close(&self) -> bool {
        matches!(self, Self::ClosedPrematurely)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Session layer errors
#[derive(Debug, Error)]
pub enum SessionError {
    // =========================================================================
    // Construction
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Transport
    // =========================================================================
    #[error("Connection error{}: {source}", state.as_ref().map(|s| format!(" while {s}")).unwrap_or_default())]
    Connection {
        /// Lifecycle state the failure happened in, when known
        state: Option<String>,
        #[source]
        source: TransportError,
    },

    // =========================================================================
    // Limits
    // =========================================================================
    #[error("Message too large: {size} bytes exceeds limit of {max} bytes")]
    Capacity { size: usize, max: usize },

    // =========================================================================
    // Lifecycle
    // =========================================================================
    #[error("Cannot {operation}. Current state: {state}")]
    State {
        operation: &'static str,
        state: String,
    },
}

impl SessionError {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl std::fmt::Display) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Create a state error for an operation refused in `state`
    #[must_use]
    pub fn state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::State {
            operation,
            state: state.to_string(),
        }
    }

    /// Wrap a transport failure, annotated with the state it occurred in
    #[must_use]
    pub fn connection_in(state: impl std::fmt::Display, source: TransportError) -> Self {
        Self::Connection {
            state: Some(state.to_string()),
            source,
        }
    }

    /// Get a stable error code for logs and events
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Capacity { .. } => "CAPACITY_ERROR",
            Self::State { .. } => "STATE_ERROR",
        }
    }

    #[must_use]
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }

    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }

    /// The underlying transport failure, if any
    #[must_use]
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Connection { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this error is a premature peer close
    #[must_use]
    pub fn is_premature_close(&self) -> bool {
        self.transport_error()
            .is_some_and(TransportError::is_premature_close)
    }
}

impl From<TransportError> for SessionError {
    fn from(source: TransportError) -> Self {
        Self::Connection {
            state: None,
            source,
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
