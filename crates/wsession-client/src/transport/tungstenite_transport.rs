//! Transport over a tokio-tungstenite client socket

use async_trait::async_trait;
use bytes::Bytes;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wsession_core::transport::Frame;
use wsession_core::{
    CloseCode, ConnectionOptions, FrameCodec, MessageKind, MessagePayload, MessageTransport,
    SocketTransport, TransportError,
};

use super::Connector;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client side of one WebSocket connection
pub type TungsteniteTransport = SocketTransport<TungsteniteCodec, WsStream>;

/// Connects with `tokio_tungstenite::connect_async`
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(
        &self,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn MessageTransport>, TransportError> {
        let url = options.url();
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(url = %url, status = %response.status(), "WebSocket handshake complete");
        Ok(Arc::new(TungsteniteTransport::new(stream)))
    }
}

/// Frame mapping for tungstenite messages
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteCodec;

impl FrameCodec for TungsteniteCodec {
    type Message = Message;
    type Error = WsError;

    fn decode(message: Message) -> Frame {
        match message {
            Message::Text(text) => Frame::Data(Bytes::from(text), MessageKind::Text),
            Message::Binary(data) => Frame::Data(Bytes::from(data), MessageKind::Binary),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::Control,
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                    .unwrap_or_default();
                Frame::Close { code, reason }
            }
        }
    }

    fn encode(payload: &MessagePayload) -> Message {
        match payload {
            MessagePayload::Text(text) => Message::Text(text.clone()),
            MessagePayload::Binary(data) => Message::Binary(data.to_vec()),
        }
    }

    fn close_frame(code: CloseCode, reason: &str) -> Message {
        Message::Close(Some(CloseFrame {
            code: WsCloseCode::from(code.as_u16()),
            reason: Cow::Owned(reason.to_string()),
        }))
    }

    fn map_error(error: WsError) -> TransportError {
        match error {
            WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                TransportError::ClosedPrematurely
            }
            WsError::Io(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                TransportError::ClosedPrematurely
            }
            WsError::Io(e) => TransportError::Io(e.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}
