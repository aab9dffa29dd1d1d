//! Value objects - options, close codes, payloads

mod close_code;
mod options;
mod payload;

pub use close_code::CloseCode;
pub use options::{
    ConnectionOptions, ConnectionOptionsBuilder, DEFAULT_HOST, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_PATH, DEFAULT_PORT, DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_RETRY_COUNT,
    DEFAULT_RETRY_DELAY, MIN_RECEIVE_BUFFER_SIZE,
};
pub use payload::{MessageKind, MessagePayload, ReceivedMessage, BINARY_MARKER};
