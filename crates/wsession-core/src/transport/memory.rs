//! In-process transport pair
//!
//! Two endpoints joined by unbounded channels. Used to link a client and a
//! server manager inside one process and to drive the session layer in tests
//! without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

use super::{FragmentCursor, MessageTransport, Received, TransportState};
use crate::error::TransportError;
use crate::value_objects::{CloseCode, MessageKind, MessagePayload};

/// Frame travelling between two memory endpoints
#[derive(Debug, Clone)]
pub enum MemoryFrame {
    Data {
        data: Bytes,
        kind: MessageKind,
        end_of_message: bool,
    },
    Close {
        code: u16,
        reason: String,
    },
    /// Connection dropped without a close handshake
    Abort,
}

struct Inbound {
    rx: mpsc::UnboundedReceiver<MemoryFrame>,
    pending: Option<FragmentCursor>,
}

/// One end of an in-memory connection
pub struct MemoryTransport {
    inbound: tokio::sync::Mutex<Inbound>,
    outbound: Mutex<Option<mpsc::UnboundedSender<MemoryFrame>>>,
    state: Mutex<TransportState>,
    fail_sends: AtomicBool,
    sent: AtomicUsize,
}

impl MemoryTransport {
    /// Create two connected endpoints
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::endpoint(b_tx, a_rx), Self::endpoint(a_tx, b_rx))
    }

    fn endpoint(
        outbound: mpsc::UnboundedSender<MemoryFrame>,
        rx: mpsc::UnboundedReceiver<MemoryFrame>,
    ) -> Self {
        Self {
            inbound: tokio::sync::Mutex::new(Inbound { rx, pending: None }),
            outbound: Mutex::new(Some(outbound)),
            state: Mutex::new(TransportState::Open),
            fail_sends: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
        }
    }

    /// Send one raw frame to the peer, which may be a partial message
    pub fn send_fragment(
        &self,
        data: impl Into<Bytes>,
        kind: MessageKind,
        end_of_message: bool,
    ) -> Result<(), TransportError> {
        let state = self.state();
        if !state.is_open() {
            return Err(TransportError::NotOpen(state));
        }
        self.push(MemoryFrame::Data {
            data: data.into(),
            kind,
            end_of_message,
        })
    }

    /// Drop the connection without a close handshake
    pub fn abort(&self) {
        let _ = self.push(MemoryFrame::Abort);
        self.outbound.lock().take();
        let mut state = self.state.lock();
        if *state != TransportState::Released {
            *state = TransportState::Closed;
        }
    }

    /// Make every subsequent send fail with an I/O error
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of complete messages sent so far
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    fn push(&self, frame: MemoryFrame) -> Result<(), TransportError> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(TransportError::ClosedPrematurely)?;
        tx.send(frame).map_err(|_| TransportError::ClosedPrematurely)
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn receive(&self, buffer: &mut [u8]) -> Result<Received, TransportError> {
        let mut inbound = self.inbound.lock().await;

        loop {
            if let Some(cursor) = inbound.pending.as_mut() {
                let received = cursor.fill(buffer);
                if cursor.is_exhausted() {
                    inbound.pending = None;
                }
                return Ok(received);
            }

            if self.state() == TransportState::Released {
                return Err(TransportError::NotOpen(TransportState::Released));
            }

            match inbound.rx.recv().await {
                Some(MemoryFrame::Data {
                    data,
                    kind,
                    end_of_message,
                }) => {
                    inbound.pending = Some(FragmentCursor::new(data, kind, end_of_message));
                }
                Some(MemoryFrame::Close { code, reason }) => {
                    let mut state = self.state.lock();
                    *state = state.on_close_received();
                    return Ok(Received::Close {
                        code: Some(code),
                        reason,
                    });
                }
                Some(MemoryFrame::Abort) | None => {
                    let mut state = self.state.lock();
                    if *state != TransportState::Released {
                        *state = TransportState::Closed;
                    }
                    return Err(TransportError::ClosedPrematurely);
                }
            }
        }
    }

    async fn send(&self, payload: &MessagePayload) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Io("send failed".to_string()));
        }
        let data = match payload {
            MessagePayload::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            MessagePayload::Binary(data) => data.clone(),
        };
        self.send_fragment(data, payload.kind(), true)?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        let current = self.state();
        match current {
            TransportState::Open | TransportState::CloseReceived => {
                // The peer may already be gone; the local side still counts as closed.
                let _ = self.push(MemoryFrame::Close {
                    code: code.as_u16(),
                    reason: reason.to_string(),
                });
                let mut state = self.state.lock();
                *state = state.on_close_sent();
                Ok(())
            }
            TransportState::CloseSent | TransportState::Closed => Ok(()),
            TransportState::Released => Err(TransportError::NotOpen(current)),
        }
    }

    async fn release(&self) {
        *self.state.lock() = TransportState::Released;
        self.outbound.lock().take();
        if let Ok(mut inbound) = self.inbound.try_lock() {
            inbound.pending = None;
            inbound.rx.close();
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("state", &self.state())
            .field("sent", &self.sent_count())
            .finish()
    }
}
