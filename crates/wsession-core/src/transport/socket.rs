//! Transport over a split message socket
//!
//! Socket libraries that deliver whole messages through a `Sink` + `Stream`
//! pair share this implementation. An adapter only supplies a
//! [`FrameCodec`] for its message and error types.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::marker::PhantomData;

use super::{FragmentCursor, MessageTransport, Received, TransportState};
use crate::error::TransportError;
use crate::value_objects::{CloseCode, MessageKind, MessagePayload};

/// A socket message as the session layer sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes, MessageKind),
    Close { code: Option<u16>, reason: String },
    /// Ping, pong and raw frames
    Control,
}

/// Maps one socket library's messages and errors
pub trait FrameCodec: Send + Sync + 'static {
    type Message: Send;
    type Error: Send;

    fn decode(message: Self::Message) -> Frame;

    fn encode(payload: &MessagePayload) -> Self::Message;

    fn close_frame(code: CloseCode, reason: &str) -> Self::Message;

    /// Peers that vanished without a close handshake must map to
    /// [`TransportError::ClosedPrematurely`]
    fn map_error(error: Self::Error) -> TransportError;
}

struct ReadHalf<S> {
    stream: Option<SplitStream<S>>,
    pending: Option<FragmentCursor>,
}

/// One connection over socket `S`, decoded with `C`
pub struct SocketTransport<C: FrameCodec, S> {
    sink: tokio::sync::Mutex<Option<SplitSink<S, C::Message>>>,
    read: tokio::sync::Mutex<ReadHalf<S>>,
    state: Mutex<TransportState>,
    codec: PhantomData<fn() -> C>,
}

impl<C, S> SocketTransport<C, S>
where
    C: FrameCodec,
    S: Stream<Item = Result<C::Message, C::Error>> + Sink<C::Message, Error = C::Error> + Send + 'static,
{
    pub fn new(socket: S) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: tokio::sync::Mutex::new(Some(sink)),
            read: tokio::sync::Mutex::new(ReadHalf {
                stream: Some(stream),
                pending: None,
            }),
            state: Mutex::new(TransportState::Open),
            codec: PhantomData,
        }
    }

    fn set_state(&self, f: impl FnOnce(TransportState) -> TransportState) {
        let mut state = self.state.lock();
        *state = f(*state);
    }

    fn mark_closed(&self) {
        self.set_state(|s| {
            if s == TransportState::Released {
                s
            } else {
                TransportState::Closed
            }
        });
    }

    async fn write(&self, message: C::Message) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let sink = sink
            .as_mut()
            .ok_or(TransportError::NotOpen(TransportState::Released))?;
        sink.send(message).await.map_err(|e| {
            let err = C::map_error(e);
            if err.is_premature_close() {
                self.mark_closed();
            }
            err
        })
    }
}

#[async_trait]
impl<C, S> MessageTransport for SocketTransport<C, S>
where
    C: FrameCodec,
    S: Stream<Item = Result<C::Message, C::Error>> + Sink<C::Message, Error = C::Error> + Send + 'static,
{
    async fn receive(&self, buffer: &mut [u8]) -> Result<Received, TransportError> {
        let mut read = self.read.lock().await;

        loop {
            if let Some(cursor) = read.pending.as_mut() {
                let received = cursor.fill(buffer);
                if cursor.is_exhausted() {
                    read.pending = None;
                }
                return Ok(received);
            }

            let Some(stream) = read.stream.as_mut() else {
                return Err(TransportError::NotOpen(TransportState::Released));
            };

            match stream.next().await {
                Some(Ok(message)) => match C::decode(message) {
                    Frame::Data(data, kind) => {
                        read.pending = Some(FragmentCursor::message(data, kind));
                    }
                    Frame::Control => tracing::trace!("Control frame received"),
                    Frame::Close { code, reason } => {
                        self.set_state(TransportState::on_close_received);
                        return Ok(Received::Close { code, reason });
                    }
                },
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(C::map_error(e));
                }
                None => {
                    self.mark_closed();
                    return Err(TransportError::ClosedPrematurely);
                }
            }
        }
    }

    async fn send(&self, payload: &MessagePayload) -> Result<(), TransportError> {
        let state = self.state();
        if !state.is_open() {
            return Err(TransportError::NotOpen(state));
        }
        self.write(C::encode(payload)).await
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        let state = self.state();
        match state {
            TransportState::Open | TransportState::CloseReceived => {
                self.set_state(TransportState::on_close_sent);
                self.write(C::close_frame(code, reason)).await
            }
            TransportState::CloseSent | TransportState::Closed => Ok(()),
            TransportState::Released => Err(TransportError::NotOpen(state)),
        }
    }

    async fn release(&self) {
        *self.state.lock() = TransportState::Released;
        if let Ok(mut sink) = self.sink.try_lock() {
            sink.take();
        }
        if let Ok(mut read) = self.read.try_lock() {
            read.stream.take();
            read.pending = None;
        }
    }
}

impl<C: FrameCodec, S> std::fmt::Debug for SocketTransport<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("codec", &std::any::type_name::<C>())
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Wire {
        Text(String),
        Binary(Vec<u8>),
        Ping,
        Close(u16, String),
    }

    #[derive(Debug)]
    enum WireError {
        Reset,
        Garbled,
    }

    struct WireCodec;

    impl FrameCodec for WireCodec {
        type Message = Wire;
        type Error = WireError;

        fn decode(message: Wire) -> Frame {
            match message {
                Wire::Text(text) => Frame::Data(Bytes::from(text), MessageKind::Text),
                Wire::Binary(data) => Frame::Data(Bytes::from(data), MessageKind::Binary),
                Wire::Ping => Frame::Control,
                Wire::Close(code, reason) => Frame::Close {
                    code: Some(code),
                    reason,
                },
            }
        }

        fn encode(payload: &MessagePayload) -> Wire {
            match payload {
                MessagePayload::Text(text) => Wire::Text(text.clone()),
                MessagePayload::Binary(data) => Wire::Binary(data.to_vec()),
            }
        }

        fn close_frame(code: CloseCode, reason: &str) -> Wire {
            Wire::Close(code.as_u16(), reason.to_string())
        }

        fn map_error(error: WireError) -> TransportError {
            match error {
                WireError::Reset => TransportError::ClosedPrematurely,
                WireError::Garbled => TransportError::Protocol("garbled".to_string()),
            }
        }
    }

    /// Socket whose reads are fed by the test and whose writes are captured
    struct Duplex {
        inbound: mpsc::UnboundedReceiver<Result<Wire, WireError>>,
        outbound: mpsc::UnboundedSender<Wire>,
    }

    impl Stream for Duplex {
        type Item = Result<Wire, WireError>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inbound.poll_recv(cx)
        }
    }

    impl Sink<Wire> for Duplex {
        type Error = WireError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WireError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Wire) -> Result<(), WireError> {
            self.outbound.send(item).map_err(|_| WireError::Reset)
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WireError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WireError>> {
            Poll::Ready(Ok(()))
        }
    }

    type WireTransport = SocketTransport<WireCodec, Duplex>;

    fn socket() -> (
        WireTransport,
        mpsc::UnboundedSender<Result<Wire, WireError>>,
        mpsc::UnboundedReceiver<Wire>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let transport = WireTransport::new(Duplex {
            inbound: in_rx,
            outbound: out_tx,
        });
        (transport, in_tx, out_rx)
    }

    #[tokio::test]
    async fn test_message_larger_than_buffer_is_fragmented() {
        let (transport, feed, _wire) = socket();
        feed.send(Ok(Wire::Ping)).unwrap();
        feed.send(Ok(Wire::Text("hello world".to_string()))).unwrap();

        let mut buffer = [0u8; 4];
        let mut text = Vec::new();
        loop {
            let Received::Fragment { len, kind, end_of_message } =
                transport.receive(&mut buffer).await.unwrap()
            else {
                panic!("expected fragment");
            };
            assert_eq!(kind, MessageKind::Text);
            text.extend_from_slice(&buffer[..len]);
            if end_of_message {
                break;
            }
        }
        assert_eq!(text, b"hello world");
    }

    #[tokio::test]
    async fn test_send_encodes_payload() {
        let (transport, _feed, mut wire) = socket();

        transport.send(&MessagePayload::from("hi")).await.unwrap();
        transport.send(&MessagePayload::from(vec![7u8, 8])).await.unwrap();

        assert_eq!(wire.recv().await, Some(Wire::Text("hi".to_string())));
        assert_eq!(wire.recv().await, Some(Wire::Binary(vec![7, 8])));
    }

    #[tokio::test]
    async fn test_close_handshake_from_peer() {
        let (transport, feed, mut wire) = socket();
        feed.send(Ok(Wire::Close(1000, "bye".to_string()))).unwrap();

        let mut buffer = [0u8; 16];
        let received = transport.receive(&mut buffer).await.unwrap();
        assert_eq!(
            received,
            Received::Close { code: Some(1000), reason: "bye".to_string() }
        );
        assert_eq!(transport.state(), TransportState::CloseReceived);

        transport.close(CloseCode::NormalClosure, "ok").await.unwrap();
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(wire.recv().await, Some(Wire::Close(1000, "ok".to_string())));
    }

    #[tokio::test]
    async fn test_send_after_close_is_refused() {
        let (transport, _feed, _wire) = socket();
        transport.close(CloseCode::MessageTooBig, "too big").await.unwrap();
        assert_eq!(transport.state(), TransportState::CloseSent);

        let err = transport.send(&MessagePayload::from("late")).await.unwrap_err();
        assert_eq!(err, TransportError::NotOpen(TransportState::CloseSent));

        // Second close is a no-op
        transport.close(CloseCode::NormalClosure, "again").await.unwrap();
    }

    #[tokio::test]
    async fn test_errors_are_mapped() {
        let (transport, feed, _wire) = socket();
        feed.send(Err(WireError::Garbled)).unwrap();

        let mut buffer = [0u8; 16];
        let err = transport.receive(&mut buffer).await.unwrap_err();
        assert_eq!(err, TransportError::Protocol("garbled".to_string()));
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_vanished_peer_is_premature_close() {
        let (transport, feed, _wire) = socket();
        feed.send(Err(WireError::Reset)).unwrap();

        let mut buffer = [0u8; 16];
        assert!(transport.receive(&mut buffer).await.unwrap_err().is_premature_close());

        let (transport, feed, _wire) = socket();
        drop(feed);
        assert!(transport.receive(&mut buffer).await.unwrap_err().is_premature_close());
    }

    #[tokio::test]
    async fn test_release() {
        let (transport, _feed, _wire) = socket();
        transport.release().await;
        transport.release().await;
        assert_eq!(transport.state(), TransportState::Released);

        let mut buffer = [0u8; 16];
        assert_eq!(
            transport.receive(&mut buffer).await.unwrap_err(),
            TransportError::NotOpen(TransportState::Released)
        );
        assert!(transport.close(CloseCode::NormalClosure, "x").await.is_err());
    }
}
