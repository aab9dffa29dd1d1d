//! Client transports
//!
//! A [`Connector`] opens one transport per connect attempt. The manager only
//! ever talks to the [`MessageTransport`] it returns.

mod tungstenite_transport;

pub use tungstenite_transport::{TungsteniteCodec, TungsteniteConnector, TungsteniteTransport};

use async_trait::async_trait;
use std::sync::Arc;
use wsession_core::{ConnectionOptions, MessageTransport, TransportError};

/// Opens transports to the endpoint named by the options
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn MessageTransport>, TransportError>;
}
