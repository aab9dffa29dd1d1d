//! Fragment reassembly
//!
//! Accumulates inbound fragments into complete messages while enforcing the
//! maximum message size.

use bytes::{Bytes, BytesMut};

use crate::error::{SessionError, SessionResult};
use crate::transport::{MessageTransport, Received};
use crate::value_objects::{MessageKind, MessagePayload};

/// Result of reading one message from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(MessagePayload),
    /// Peer started the close handshake
    Closed { code: Option<u16>, reason: String },
}

/// Per-connection reassembly buffer
#[derive(Debug)]
pub struct MessageReassembler {
    buffer: BytesMut,
    kind: Option<MessageKind>,
    max_message_size: usize,
}

impl MessageReassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            kind: None,
            max_message_size,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Bytes accumulated for the message in progress
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append one fragment. Returns the message once `end_of_message` is seen.
    ///
    /// A fragment that would push the message past the limit discards
    /// everything accumulated so far and fails with a capacity error.
    pub fn push(
        &mut self,
        chunk: &[u8],
        kind: MessageKind,
        end_of_message: bool,
    ) -> SessionResult<Option<MessagePayload>> {
        let size = self.buffer.len() + chunk.len();
        if size > self.max_message_size {
            self.reset();
            return Err(SessionError::Capacity {
                size,
                max: self.max_message_size,
            });
        }

        self.buffer.extend_from_slice(chunk);
        // Continuation frames carry no kind of their own
        let kind = *self.kind.get_or_insert(kind);

        if !end_of_message {
            return Ok(None);
        }

        let data = self.buffer.split().freeze();
        self.kind = None;
        Ok(Some(materialize(data, kind)))
    }

    /// Drop a partially accumulated message
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.kind = None;
    }

    /// Receive fragments from `transport` into `scratch` until one message is
    /// complete or the peer closes.
    pub async fn read_from<T>(&mut self, transport: &T, scratch: &mut [u8]) -> SessionResult<Inbound>
    where
        T: MessageTransport + ?Sized,
    {
        loop {
            match transport.receive(scratch).await? {
                Received::Fragment {
                    len,
                    kind,
                    end_of_message,
                } => {
                    tracing::trace!(len, ?kind, end_of_message, "Fragment received");
                    if let Some(message) = self.push(&scratch[..len], kind, end_of_message)? {
                        return Ok(Inbound::Message(message));
                    }
                }
                Received::Close { code, reason } => {
                    if !self.buffer.is_empty() {
                        tracing::debug!(discarded = self.buffer.len(), "Close received mid-message");
                    }
                    self.reset();
                    return Ok(Inbound::Closed { code, reason });
                }
            }
        }
    }
}

fn materialize(data: Bytes, kind: MessageKind) -> MessagePayload {
    match kind {
        MessageKind::Text => MessagePayload::Text(String::from_utf8_lossy(&data).into_owned()),
        MessageKind::Binary => MessagePayload::Binary(data),
    }
}
