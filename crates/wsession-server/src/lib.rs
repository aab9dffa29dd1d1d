//! # wsession-server
//!
//! Server-side session management: connection registry, per-connection
//! receive loops, broadcast fan-out and the axum hosting adapter.

pub mod broadcast;
pub mod connection;
pub mod server;
pub mod transport;

pub use broadcast::{BroadcastEngine, BroadcastReport};
pub use connection::{ConnectionRegistry, ServerConnectionManager, ServerSettings};
pub use server::{create_app, run, run_server};
pub use transport::{AxumCodec, AxumTransport};
