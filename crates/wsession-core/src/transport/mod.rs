//! Transport contract
//!
//! The session layer consumes an already-upgraded, bidirectional message
//! socket through [`MessageTransport`]. Framing, masking and the upgrade
//! handshake belong to the implementation behind the trait.

mod cursor;
pub mod memory;
mod socket;

pub use cursor::FragmentCursor;
pub use memory::{MemoryFrame, MemoryTransport};
pub use socket::{Frame, FrameCodec, SocketTransport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::value_objects::{CloseCode, MessageKind, MessagePayload};

/// Socket state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportState {
    Open,
    /// We sent a close frame and wait for the peer's
    CloseSent,
    /// The peer sent a close frame we have not answered yet
    CloseReceived,
    Closed,
    /// Underlying socket dropped
    Released,
}

impl TransportState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// States in which a close frame may still be sent
    pub fn is_closable(self) -> bool {
        matches!(self, Self::Open | Self::CloseSent | Self::CloseReceived)
    }

    /// State after a close frame arrives from the peer
    #[must_use]
    pub fn on_close_received(self) -> Self {
        match self {
            Self::Open => Self::CloseReceived,
            Self::CloseSent => Self::Closed,
            other => other,
        }
    }

    /// State after we send a close frame
    #[must_use]
    pub fn on_close_sent(self) -> Self {
        match self {
            Self::Open => Self::CloseSent,
            Self::CloseReceived => Self::Closed,
            other => other,
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "Open",
            Self::CloseSent => "CloseSent",
            Self::CloseReceived => "CloseReceived",
            Self::Closed => "Closed",
            Self::Released => "Released",
        };
        f.write_str(name)
    }
}

/// Outcome of one receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// `len` bytes were written to the front of the caller's buffer
    Fragment {
        len: usize,
        kind: MessageKind,
        end_of_message: bool,
    },
    /// The peer started or completed the close handshake
    Close { code: Option<u16>, reason: String },
}

/// An already-negotiated message socket
///
/// Receive and send may run concurrently from different tasks; sends on one
/// transport are serialized by the implementation.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Wait for the next fragment and copy it into `buffer`.
    ///
    /// Messages longer than the buffer arrive as several fragments; only the
    /// last one has `end_of_message` set.
    async fn receive(&self, buffer: &mut [u8]) -> Result<Received, TransportError>;

    /// Send `payload` as one complete frame
    async fn send(&self, payload: &MessagePayload) -> Result<(), TransportError>;

    fn state(&self) -> TransportState;

    fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Start (or answer) the close handshake
    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError>;

    /// Drop the underlying socket. Idempotent.
    async fn release(&self);
}
