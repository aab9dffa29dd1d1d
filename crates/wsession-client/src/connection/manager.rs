//! Client connection manager
//!
//! Drives one outbound connection through its lifecycle: connect with
//! bounded retries, a background receive loop, sends gated on state and an
//! orderly disconnect.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wsession_core::{
    BufferPool, ClientEvent, ClientState, CloseCode, ConnectionOptions, EventBus, Inbound,
    MessagePayload, MessageReassembler, MessageTransport, PooledBuffer, ReceivedMessage,
    SessionError, SessionResult, StateMachine, TransportError,
};

use crate::transport::{Connector, TungsteniteConnector};

/// How long `disconnect` waits for the receive loop before aborting it
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `dispose` waits for the receive loop before aborting it
pub const DISPOSE_TIMEOUT: Duration = Duration::from_secs(2);

const CLIENT_CLOSE_REASON: &str = "Client disconnect";
const TOO_LARGE_REASON: &str = "Message too large";

/// Client-side session manager
pub struct ClientConnectionManager {
    id: String,
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    state: Arc<StateMachine<ClientState>>,
    events: Arc<EventBus<ClientEvent>>,
    transport: Mutex<Option<Arc<dyn MessageTransport>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    /// Replaced on every connect; cancels retries and the receive loop
    cancel: Mutex<CancellationToken>,
    buffers: BufferPool,
}

impl ClientConnectionManager {
    /// Create a manager that connects over tokio-tungstenite
    pub fn new(options: ConnectionOptions) -> Self {
        Self::with_connector(options, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(options: ConnectionOptions, connector: Arc<dyn Connector>) -> Self {
        let events = Arc::new(EventBus::new());
        let bus = events.clone();
        let state = StateMachine::with_observer("client", ClientState::Disconnected, move |transition| {
            bus.publish(ClientEvent::StateChanged(transition.clone()));
        });

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            buffers: BufferPool::new(options.receive_buffer_size(), 1),
            options,
            connector,
            state: Arc::new(state),
            events,
            transport: Mutex::new(None),
            receive_task: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect, retrying up to the configured number of attempts.
    ///
    /// Only valid from Disconnected or Faulted. When every attempt fails the
    /// client ends Faulted and the last failure is returned.
    pub async fn connect(&self) -> SessionResult<()> {
        // Token swap and transition happen under one guard so a disconnect
        // landing right after Connecting cancels this attempt
        let cancel = {
            let mut slot = self.cancel.lock();
            self.state
                .try_transition(ClientState::can_connect, ClientState::Connecting, "Connecting")
                .map_err(|current| SessionError::state("connect", current))?;
            let cancel = CancellationToken::new();
            *slot = cancel.clone();
            cancel
        };

        let attempts = self.options.connect_attempts();
        let delay = self.options.retry_delay();
        let mut last_error = TransportError::Cancelled;

        for attempt in 1..=attempts {
            tracing::info!(url = %self.options.url(), attempt, attempts, "Connecting");

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(TransportError::Cancelled),
                result = self.connector.connect(&self.options) => result,
            };

            match result {
                Ok(transport) => return self.on_connected(transport, cancel).await,
                Err(_) if cancel.is_cancelled() => return Err(self.connect_cancelled()),
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Connect attempt failed");
                    last_error = e;
                }
            }

            if attempt < attempts {
                self.state.transition(
                    ClientState::Reconnecting,
                    format!("Retry {attempt}/{attempts} in {delay:?}"),
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(self.connect_cancelled()),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        let applied = self.state.transition(
            ClientState::Faulted,
            format!("Connection failed after {attempts} attempts: {last_error}"),
        );
        tracing::error!(attempts, error = %last_error, "Connection failed");

        if applied {
            self.events.publish(ClientEvent::ErrorOccurred(Arc::new(
                SessionError::connection_in(ClientState::Connecting, last_error.clone()),
            )));
        }
        Err(SessionError::connection_in(ClientState::Connecting, last_error))
    }

    fn connect_cancelled(&self) -> SessionError {
        tracing::debug!(state = %self.state.current(), "Connect cancelled");
        SessionError::connection_in(ClientState::Connecting, TransportError::Cancelled)
    }

    async fn on_connected(
        &self,
        transport: Arc<dyn MessageTransport>,
        cancel: CancellationToken,
    ) -> SessionResult<()> {
        *self.transport.lock() = Some(transport.clone());

        // A disconnect or dispose may have won the race
        if !self.state.transition(ClientState::Connected, "Connected") {
            self.transport.lock().take();
            transport.release().await;
            return Err(self.connect_cancelled());
        }

        tracing::info!(url = %self.options.url(), client_id = %self.id, "Connected");
        self.events.publish(ClientEvent::Connected);

        let receiver = ReceiveLoop {
            client_id: self.id.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            transport,
            cancel,
            buffer: self.buffers.rent(),
            reassembler: MessageReassembler::new(self.options.max_message_size()),
        };
        *self.receive_task.lock() = Some(tokio::spawn(receiver.run()));
        Ok(())
    }

    /// Close the connection and return to Disconnected.
    ///
    /// Also interrupts a connect that is still retrying. Does nothing once
    /// the client is disposed.
    pub async fn disconnect(&self) {
        let state = self.state.current();
        if state == ClientState::Disposed {
            return;
        }
        if state == ClientState::Disconnected && self.transport.lock().is_none() {
            tracing::debug!("Already disconnected");
            return;
        }

        self.state.transition(ClientState::Disconnecting, "Disconnecting");
        self.teardown(DISCONNECT_TIMEOUT).await;

        if self.state.transition(ClientState::Disconnected, "Disconnected by client") {
            tracing::info!(client_id = %self.id, "Disconnected");
            self.events.publish(ClientEvent::ConnectionClosed {
                reason: "Disconnected by client".to_string(),
            });
        }
    }

    /// Release everything and move to Disposed. Idempotent.
    pub async fn dispose(&self) {
        if self.state.current() == ClientState::Disposed {
            return;
        }

        self.teardown(DISPOSE_TIMEOUT).await;
        self.state.transition(ClientState::Disposed, "Disposed");
        tracing::debug!(client_id = %self.id, "Client disposed");
    }

    /// Cancel the loop, wait up to `wait` for it, then close and release
    /// the transport
    async fn teardown(&self, wait: Duration) {
        self.cancel.lock().cancel();

        let task = self.receive_task.lock().take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(wait, task).await.is_err() {
                tracing::warn!(timeout = ?wait, "Receive loop did not stop in time, aborting");
                abort.abort();
            }
        }

        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            if transport.state().is_closable() {
                if let Err(e) = transport.close(CloseCode::NormalClosure, CLIENT_CLOSE_REASON).await {
                    tracing::debug!(error = %e, "Close failed");
                }
            }
            transport.release().await;
        }
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    pub async fn send_text(&self, text: impl Into<String>) -> SessionResult<()> {
        self.send(MessagePayload::Text(text.into())).await
    }

    pub async fn send_binary(&self, data: impl Into<bytes::Bytes>) -> SessionResult<()> {
        self.send(MessagePayload::Binary(data.into())).await
    }

    /// Send one message. Fails with a state error unless connected.
    pub async fn send(&self, payload: MessagePayload) -> SessionResult<()> {
        let state = self.state.current();
        if !state.can_send() {
            return Err(SessionError::state("send message", state));
        }
        let transport = self
            .transport
            .lock()
            .clone()
            .ok_or_else(|| SessionError::state("send message", state))?;

        if let Err(e) = transport.send(&payload).await {
            tracing::warn!(error = %e, "Send failed");
            self.events.publish(ClientEvent::ErrorOccurred(Arc::new(
                SessionError::connection_in(state, e.clone()),
            )));
            return Err(SessionError::connection_in(state, e));
        }

        tracing::trace!(kind = ?payload.kind(), len = payload.len(), "Message sent");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Identity stamped on received messages
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ClientState {
        self.state.current()
    }

    pub fn is_connected(&self) -> bool {
        self.state.current() == ClientState::Connected
            && self.transport.lock().as_ref().is_some_and(|t| t.is_open())
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Receive every client event published from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.events.subscribe()
    }
}

impl Drop for ClientConnectionManager {
    fn drop(&mut self) {
        self.cancel.lock().cancel();
    }
}

impl std::fmt::Debug for ClientConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnectionManager")
            .field("id", &self.id)
            .field("state", &self.state.current())
            .field("url", &self.options.url())
            .finish()
    }
}

/// Background reader for one established connection
struct ReceiveLoop {
    client_id: String,
    state: Arc<StateMachine<ClientState>>,
    events: Arc<EventBus<ClientEvent>>,
    transport: Arc<dyn MessageTransport>,
    cancel: CancellationToken,
    buffer: PooledBuffer,
    reassembler: MessageReassembler,
}

impl ReceiveLoop {
    async fn run(mut self) {
        tracing::debug!(client_id = %self.client_id, "Receive loop started");

        if self.read_until_closed().await {
            self.transport.release().await;
        }
        tracing::debug!(client_id = %self.client_id, "Receive loop ended");
    }

    /// Returns whether the connection ended on its own rather than by
    /// cancellation
    async fn read_until_closed(&mut self) -> bool {
        loop {
            let inbound = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!(client_id = %self.client_id, "Receive loop cancelled");
                    return false;
                }
                result = self.reassembler.read_from(self.transport.as_ref(), &mut self.buffer[..]) => result,
            };

            match inbound {
                Ok(Inbound::Message(payload)) => {
                    tracing::debug!(kind = ?payload.kind(), len = payload.len(), "Message received");
                    self.events.publish(ClientEvent::MessageReceived(ReceivedMessage::new(
                        &self.client_id,
                        payload,
                    )));
                }
                Ok(Inbound::Closed { code, reason }) => {
                    tracing::info!(
                        code = ?code,
                        close = ?code.and_then(CloseCode::from_u16),
                        reason = %reason,
                        "Server closed connection"
                    );
                    if let Err(e) = self.transport.close(CloseCode::NormalClosure, CLIENT_CLOSE_REASON).await {
                        tracing::debug!(error = %e, "Close reply failed");
                    }
                    self.closed("Closed by server");
                    return true;
                }
                Err(e) if e.is_premature_close() => {
                    tracing::info!("Connection closed prematurely");
                    self.closed("Connection closed");
                    return true;
                }
                Err(e) if e.is_capacity() => {
                    tracing::warn!(error = %e, "Closing connection: message too large");
                    if let Err(close_err) = self.transport.close(CloseCode::MessageTooBig, TOO_LARGE_REASON).await {
                        tracing::debug!(error = %close_err, "Close failed");
                    }
                    self.faulted(e);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Receive failed");
                    self.faulted(e);
                    return true;
                }
            }
        }
    }

    fn closed(&self, reason: &str) {
        if self.state.transition(ClientState::Disconnected, reason) {
            self.events.publish(ClientEvent::ConnectionClosed {
                reason: reason.to_string(),
            });
        }
    }

    fn faulted(&self, error: SessionError) {
        if self.state.transition(ClientState::Faulted, error.to_string()) {
            self.events.publish(ClientEvent::ErrorOccurred(Arc::new(error)));
        }
    }
}
