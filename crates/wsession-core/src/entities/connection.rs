//! A single accepted or outbound socket
//!
//! Holds identity, timestamps and the transport handle. Only the owning
//! manager mutates it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{MessageTransport, TransportState};
use crate::value_objects::{CloseCode, MessagePayload};

/// One connection
pub struct Connection {
    /// Unique identity
    id: String,

    transport: Arc<dyn MessageTransport>,

    /// Position in accept order
    sequence: u64,

    connected_at: DateTime<Utc>,
    disconnected_at: RwLock<Option<DateTime<Utc>>>,

    /// Set once cleanup has started
    cleaned: AtomicBool,
}

impl Connection {
    /// Create a connection with a fresh UUID v4 identity
    pub fn new(transport: Arc<dyn MessageTransport>, sequence: u64) -> Arc<Self> {
        Self::with_id(Uuid::new_v4().to_string(), transport, sequence)
    }

    pub fn with_id(id: impl Into<String>, transport: Arc<dyn MessageTransport>, sequence: u64) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            transport,
            sequence,
            connected_at: Utc::now(),
            disconnected_at: RwLock::new(None),
            cleaned: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.transport
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn disconnected_at(&self) -> Option<DateTime<Utc>> {
        *self.disconnected_at.read()
    }

    /// True iff the transport reports open
    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    /// Record the disconnect time. Returns false if already recorded.
    pub fn mark_disconnected(&self) -> bool {
        let mut disconnected_at = self.disconnected_at.write();
        if disconnected_at.is_some() {
            return false;
        }
        *disconnected_at = Some(Utc::now());
        true
    }

    /// Claim cleanup. Only the first caller gets true.
    pub fn begin_cleanup(&self) -> bool {
        !self.cleaned.swap(true, Ordering::SeqCst)
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// Send one complete frame
    pub async fn send(&self, payload: &MessagePayload) -> Result<(), TransportError> {
        self.transport.send(payload).await
    }

    /// Close gracefully if the transport still allows it
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        if !self.transport.state().is_closable() {
            return Ok(());
        }
        self.transport.close(code, reason).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("sequence", &self.sequence)
            .field("state", &self.transport.state())
            .field("connected_at", &self.connected_at)
            .field("disconnected_at", &self.disconnected_at())
            .finish()
    }
}
