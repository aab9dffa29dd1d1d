//! Connection management
//!
//! Registry of live connections and the server manager that owns them.

mod manager;
mod registry;

pub use manager::{
    ServerConnectionManager, ServerSettings, DEFAULT_CLOSE_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use registry::ConnectionRegistry;
