//! Events published by the client and server managers

use std::sync::Arc;

use crate::entities::Connection;
use crate::error::SessionError;
use crate::state::{ClientState, ServerState, StateTransition};
use crate::value_objects::ReceivedMessage;

/// Client manager events
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    MessageReceived(ReceivedMessage),
    ConnectionClosed { reason: String },
    ErrorOccurred(Arc<SessionError>),
    StateChanged(StateTransition<ClientState>),
}

impl ClientEvent {
    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::MessageReceived(_) => "MESSAGE_RECEIVED",
            Self::ConnectionClosed { .. } => "CONNECTION_CLOSED",
            Self::ErrorOccurred(_) => "ERROR_OCCURRED",
            Self::StateChanged(_) => "STATE_CHANGED",
        }
    }
}

/// Server manager events
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected(Arc<Connection>),
    ClientDisconnected(Arc<Connection>),
    MessageReceived {
        connection: Arc<Connection>,
        message: ReceivedMessage,
    },
    /// A receive loop failed for a reason other than a peer close
    ConnectionError {
        connection_id: String,
        error: Arc<SessionError>,
    },
    ServerStopped,
    StateChanged(StateTransition<ServerState>),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClientConnected(_) => "CLIENT_CONNECTED",
            Self::ClientDisconnected(_) => "CLIENT_DISCONNECTED",
            Self::MessageReceived { .. } => "MESSAGE_RECEIVED",
            Self::ConnectionError { .. } => "CONNECTION_ERROR",
            Self::ServerStopped => "SERVER_STOPPED",
            Self::StateChanged(_) => "STATE_CHANGED",
        }
    }

    /// Identity of the connection the event concerns, if any
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            Self::ClientConnected(conn) | Self::ClientDisconnected(conn) => Some(conn.id()),
            Self::MessageReceived { connection, .. } => Some(connection.id()),
            Self::ConnectionError { connection_id, .. } => Some(connection_id),
            Self::ServerStopped | Self::StateChanged(_) => None,
        }
    }
}
