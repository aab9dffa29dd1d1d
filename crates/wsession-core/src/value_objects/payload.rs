//! Message payloads

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker shown in place of binary content
pub const BINARY_MARKER: &str = "[BINARY DATA]";

/// Kind of a frame on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Binary,
}

/// A complete, reassembled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Text(String),
    Binary(Bytes),
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Binary(_) => MessageKind::Binary,
        }
    }

    /// Raw bytes of the payload
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Text for event consumers; binary content becomes an opaque marker
    pub fn display_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Binary(_) => BINARY_MARKER,
        }
    }
}

impl From<String> for MessagePayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessagePayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for MessagePayload {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for MessagePayload {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

/// A message received from one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub content: MessagePayload,
    pub received_at: DateTime<Utc>,
    /// Identity of the connection the message arrived on
    pub connection_id: String,
}

impl ReceivedMessage {
    #[must_use]
    pub fn new(connection_id: impl Into<String>, content: MessagePayload) -> Self {
        Self {
            content,
            received_at: Utc::now(),
            connection_id: connection_id.into(),
        }
    }

    pub fn text(&self) -> &str {
        self.content.display_text()
    }
}
