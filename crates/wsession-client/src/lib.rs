//! # wsession-client
//!
//! Client-side session management: a lifecycle state machine, bounded
//! connect retries, a background receive loop and the tokio-tungstenite
//! connector.

pub mod connection;
pub mod transport;

pub use connection::ClientConnectionManager;
pub use transport::{Connector, TungsteniteCodec, TungsteniteConnector, TungsteniteTransport};
