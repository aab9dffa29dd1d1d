//! Transport over an upgraded axum WebSocket

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use std::borrow::Cow;
use wsession_core::transport::Frame;
use wsession_core::{CloseCode, FrameCodec, MessageKind, MessagePayload, SocketTransport, TransportError};

/// Server side of one WebSocket connection
pub type AxumTransport = SocketTransport<AxumCodec, WebSocket>;

/// Frame mapping for axum's `ws` messages
#[derive(Debug, Clone, Copy, Default)]
pub struct AxumCodec;

impl FrameCodec for AxumCodec {
    type Message = Message;
    type Error = axum::Error;

    fn decode(message: Message) -> Frame {
        match message {
            Message::Text(text) => Frame::Data(Bytes::from(text), MessageKind::Text),
            Message::Binary(data) => Frame::Data(Bytes::from(data), MessageKind::Binary),
            Message::Ping(_) | Message::Pong(_) => Frame::Control,
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (Some(f.code), f.reason.into_owned()))
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
            code: code.as_u16(),
            reason: Cow::Owned(reason.to_string()),
        }))
    }

    /// Walks the source chain; axum wraps the tungstenite error
    fn map_error(error: axum::Error) -> TransportError {
        let mut source = Some(&error as &(dyn std::error::Error + 'static));
        while let Some(err) = source {
            if let Some(io) = err.downcast_ref::<std::io::Error>() {
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::UnexpectedEof
                ) {
                    return TransportError::ClosedPrematurely;
                }
            }
            if err.to_string().contains("without closing handshake") {
                return TransportError::ClosedPrematurely;
            }
            source = err.source();
        }

        let message = error.to_string();
        if message.contains("closed") {
            TransportError::ClosedPrematurely
        } else {
            TransportError::Protocol(message)
        }
    }
}
