//! Client connection management

mod manager;

pub use manager::{ClientConnectionManager, DISCONNECT_TIMEOUT, DISPOSE_TIMEOUT};
