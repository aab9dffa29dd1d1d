//! Error types

mod session_error;

pub use session_error::{SessionError, SessionResult, TransportError};
