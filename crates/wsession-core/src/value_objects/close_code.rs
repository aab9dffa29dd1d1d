//! WebSocket close codes
//!
//! The RFC 6455 status codes the session layer sends or interprets.

use serde::{Deserialize, Serialize};

/// Close status codes
///
/// These codes are sent when closing a connection to indicate the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure; the purpose of the connection was fulfilled
    NormalClosure = 1000,
    /// Endpoint is going away or unavailable
    EndpointUnavailable = 1001,
    /// Protocol error
    ProtocolError = 1002,
    /// Received data of a type that cannot be accepted
    InvalidMessageType = 1003,
    /// Payload inconsistent with its message type
    InvalidPayloadData = 1007,
    /// Message violates the endpoint's policy
    PolicyViolation = 1008,
    /// Message exceeds the size the endpoint accepts
    MessageTooBig = 1009,
    /// Server hit an unexpected condition
    InternalServerError = 1011,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::NormalClosure),
            1001 => Some(Self::EndpointUnavailable),
            1002 => Some(Self::ProtocolError),
            1003 => Some(Self::InvalidMessageType),
            1007 => Some(Self::InvalidPayloadData),
            1008 => Some(Self::PolicyViolation),
            1009 => Some(Self::MessageTooBig),
            1011 => Some(Self::InternalServerError),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the name of this close code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NormalClosure => "NormalClosure",
            Self::EndpointUnavailable => "EndpointUnavailable",
            Self::ProtocolError => "ProtocolError",
            Self::InvalidMessageType => "InvalidMessageType",
            Self::InvalidPayloadData => "InvalidPayloadData",
            Self::PolicyViolation => "PolicyViolation",
            Self::MessageTooBig => "MessageTooBig",
            Self::InternalServerError => "InternalServerError",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
