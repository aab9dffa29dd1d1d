//! Server connection manager
//!
//! Accepts transports, runs one receive loop per connection, keeps the
//! registry in sync and fans messages out through the broadcast engine.

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wsession_core::reassembly::DEFAULT_POOL_CAPACITY;
use wsession_core::{
    BufferPool, CloseCode, Connection, ConnectionOptions, EventBus, Inbound, MessagePayload,
    MessageReassembler, MessageTransport, ReceivedMessage, ServerEvent, ServerState,
    SessionError, SessionResult, StateMachine, TransportError,
};

use super::ConnectionRegistry;
use crate::broadcast::{BroadcastEngine, BroadcastReport};

/// How long `stop` waits for receive loops before aborting them
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for one graceful close during `stop`
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const REJECT_REASON: &str = "Server not accepting connections";
const STOP_REASON: &str = "Server stopping";
const CLEANUP_REASON: &str = "Connection closed";
const TOO_LARGE_REASON: &str = "Message too large";

/// Server behaviour knobs that are not connection options
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Relay every inbound message to all sessions
    pub relay_messages: bool,
    /// Cap on concurrent sends per broadcast
    pub broadcast_concurrency: Option<usize>,
    pub shutdown_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            relay_messages: true,
            broadcast_concurrency: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

struct ReceiveLoop {
    task: JoinHandle<()>,
    /// Child of the server shutdown token
    cancel: CancellationToken,
}

struct Inner {
    options: ConnectionOptions,
    settings: ServerSettings,
    state: StateMachine<ServerState>,
    events: Arc<EventBus<ServerEvent>>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: BroadcastEngine,
    /// Replaced on every start so a stopped server can run again
    shutdown: Mutex<CancellationToken>,
    receive_loops: DashMap<String, ReceiveLoop>,
    buffers: BufferPool,
    relay: AtomicBool,
}

/// Server-side session manager
///
/// Cheap to clone; all clones share the same registry and state.
#[derive(Clone)]
pub struct ServerConnectionManager {
    inner: Arc<Inner>,
}

impl ServerConnectionManager {
    pub fn new(options: ConnectionOptions) -> Self {
        Self::with_settings(options, ServerSettings::default())
    }

    pub fn with_settings(options: ConnectionOptions, settings: ServerSettings) -> Self {
        let events = Arc::new(EventBus::new());
        let bus = events.clone();
        let state = StateMachine::with_observer("server", ServerState::Stopped, move |transition| {
            bus.publish(ServerEvent::StateChanged(transition.clone()));
        });

        let registry = Arc::new(ConnectionRegistry::new());
        let mut broadcaster = BroadcastEngine::new(registry.clone());
        if let Some(limit) = settings.broadcast_concurrency {
            broadcaster = broadcaster.with_concurrency_limit(limit);
        }

        Self {
            inner: Arc::new(Inner {
                buffers: BufferPool::new(options.receive_buffer_size(), DEFAULT_POOL_CAPACITY),
                relay: AtomicBool::new(settings.relay_messages),
                options,
                settings,
                state,
                events,
                registry,
                broadcaster,
                shutdown: Mutex::new(CancellationToken::new()),
                receive_loops: DashMap::new(),
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Begin accepting connections
    pub fn start(&self) -> SessionResult<()> {
        self.inner
            .state
            .try_transition(ServerState::can_start, ServerState::Starting, "Server starting")
            .map_err(|current| SessionError::state("start server", current))?;

        *self.inner.shutdown.lock() = CancellationToken::new();
        self.inner.state.transition(ServerState::Running, "Server started");

        tracing::info!(address = %self.inner.options.address(), "Server started");
        Ok(())
    }

    /// Close every connection and stop accepting new ones.
    ///
    /// Does nothing unless the server is running.
    pub async fn stop(&self) {
        if let Err(current) =
            self.inner
                .state
                .try_transition(ServerState::can_stop, ServerState::Stopping, "Server stopping")
        {
            tracing::debug!(state = %current, "Stop ignored");
            return;
        }

        tracing::info!(connections = self.inner.registry.len(), "Stopping server");
        self.inner.shutdown.lock().cancel();

        self.close_all(CloseCode::NormalClosure, STOP_REASON).await;
        self.drain_receive_loops().await;

        // Loops that were aborted never reached their own cleanup
        for connection in self.inner.registry.drain() {
            self.cleanup(&connection).await;
        }
        self.inner.registry.clear();

        self.inner.state.transition(ServerState::Stopped, "Server stopped");
        self.inner.events.publish(ServerEvent::ServerStopped);
        tracing::info!("Server stopped");
    }

    /// Escalate to Faulted, e.g. when the listener fails. Open connections
    /// are asked to unwind.
    pub fn fault(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let faulted = self.inner.state.transition(ServerState::Faulted, reason.clone());
        if faulted {
            tracing::error!(reason = %reason, "Server faulted");
            self.inner.shutdown.lock().cancel();
        }
        faulted
    }

    async fn close_all(&self, code: CloseCode, reason: &str) {
        let timeout = self.inner.settings.close_timeout;
        let connections = self.inner.registry.connected_snapshot();

        let closes: Vec<_> = connections
            .into_iter()
            .map(|connection| {
                let reason = reason.to_string();
                async move {
                    match tokio::time::timeout(timeout, connection.close(code, &reason)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::debug!(connection_id = %connection.id(), error = %e, "Close failed");
                        }
                        Err(_) => {
                            tracing::warn!(connection_id = %connection.id(), "Close timed out");
                        }
                    }
                }
                .boxed()
            })
            .collect();
        futures::future::join_all(closes).await;
    }

    async fn drain_receive_loops(&self) {
        let ids: Vec<String> = self
            .inner
            .receive_loops
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let handles: Vec<JoinHandle<()>> = ids
            .iter()
            .filter_map(|id| self.inner.receive_loops.remove(id).map(|(_, entry)| entry.task))
            .collect();
        if handles.is_empty() {
            return;
        }

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.inner.settings.shutdown_timeout;

        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!(
                loops = aborts.len(),
                "Receive loops did not finish in {timeout:?}, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }
    }

    // =========================================================================
    // Accept
    // =========================================================================

    /// Take ownership of an upgraded transport.
    ///
    /// When the server is not running the transport is closed and released
    /// and never registered.
    pub async fn handle_incoming_connection(
        &self,
        transport: Arc<dyn MessageTransport>,
    ) -> SessionResult<Arc<Connection>> {
        let state = self.inner.state.current();
        if !state.can_accept_connections() {
            tracing::warn!(state = %state, "Rejecting connection");
            if let Err(e) = transport.close(CloseCode::EndpointUnavailable, REJECT_REASON).await {
                tracing::debug!(error = %e, "Close of rejected transport failed");
            }
            transport.release().await;
            return Err(SessionError::state("accept connection", state));
        }

        if !transport.is_open() {
            let transport_state = transport.state();
            transport.release().await;
            return Err(SessionError::connection_in(
                state,
                TransportError::NotOpen(transport_state),
            ));
        }

        let connection = Connection::new(transport, self.inner.registry.next_sequence());
        let id = connection.id().to_string();
        self.inner.registry.register(connection.clone());

        tracing::info!(connection_id = %id, "Client connected");
        self.inner
            .events
            .publish(ServerEvent::ClientConnected(connection.clone()));

        let cancel = self.inner.shutdown.lock().child_token();
        let manager = self.clone();
        let conn = connection.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { manager.receive_loop(conn, token).await });

        self.inner
            .receive_loops
            .insert(id.clone(), ReceiveLoop { task, cancel });
        // The loop may already have finished and tried to deregister itself
        self.inner
            .receive_loops
            .remove_if(&id, |_, entry| entry.task.is_finished());

        Ok(connection)
    }

    async fn receive_loop(&self, connection: Arc<Connection>, shutdown: CancellationToken) {
        let id = connection.id().to_string();
        let mut buffer = self.inner.buffers.rent();
        let mut reassembler = MessageReassembler::new(self.inner.options.max_message_size());

        tracing::debug!(connection_id = %id, "Receive loop started");

        loop {
            let inbound = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::debug!(connection_id = %id, "Receive loop cancelled");
                    break;
                }
                result = reassembler.read_from(connection.transport().as_ref(), &mut buffer[..]) => result,
            };

            match inbound {
                Ok(Inbound::Message(payload)) => self.on_message(&connection, payload),
                Ok(Inbound::Closed { code, reason }) => {
                    tracing::info!(
                        connection_id = %id,
                        code = ?code,
                        close = ?code.and_then(CloseCode::from_u16),
                        reason = %reason,
                        "Client closed connection"
                    );
                    break;
                }
                Err(e) if e.is_capacity() => {
                    tracing::warn!(connection_id = %id, error = %e, "Closing connection: message too large");
                    if let Err(close_err) = connection.close(CloseCode::MessageTooBig, TOO_LARGE_REASON).await {
                        tracing::debug!(connection_id = %id, error = %close_err, "Close failed");
                    }
                    self.report_error(&id, e);
                    break;
                }
                Err(e) if e.is_premature_close() => {
                    tracing::info!(connection_id = %id, "Connection closed prematurely");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "Receive failed");
                    self.report_error(&id, e);
                    break;
                }
            }
        }

        drop(buffer);
        self.cleanup(&connection).await;
        self.inner.receive_loops.remove(&id);
        tracing::debug!(connection_id = %id, "Receive loop ended");
    }

    fn on_message(&self, connection: &Arc<Connection>, payload: MessagePayload) {
        tracing::debug!(
            connection_id = %connection.id(),
            kind = ?payload.kind(),
            len = payload.len(),
            "Message received"
        );

        let relay = self.inner.relay.load(Ordering::Relaxed).then(|| payload.clone());

        self.inner.events.publish(ServerEvent::MessageReceived {
            connection: connection.clone(),
            message: ReceivedMessage::new(connection.id(), payload),
        });

        if let Some(payload) = relay {
            self.inner.broadcaster.spawn_broadcast(payload);
        }
    }

    fn report_error(&self, connection_id: &str, error: SessionError) {
        self.inner.events.publish(ServerEvent::ConnectionError {
            connection_id: connection_id.to_string(),
            error: Arc::new(error),
        });
    }

    /// Tear a connection down. Safe to call more than once; only the first
    /// call has any effect.
    pub async fn cleanup(&self, connection: &Arc<Connection>) {
        if !connection.begin_cleanup() {
            tracing::trace!(connection_id = %connection.id(), "Cleanup already done");
            return;
        }

        // Stops the loop when cleanup comes from outside it
        if let Some(entry) = self.inner.receive_loops.get(connection.id()) {
            entry.cancel.cancel();
        }

        connection.mark_disconnected();
        let removed = self.inner.registry.remove(connection.id()).is_some();

        if let Err(e) = connection.close(CloseCode::NormalClosure, CLEANUP_REASON).await {
            tracing::debug!(connection_id = %connection.id(), error = %e, "Ignoring close failure during cleanup");
        }
        connection.transport().release().await;

        tracing::info!(connection_id = %connection.id(), removed, "Client disconnected");
        self.inner
            .events
            .publish(ServerEvent::ClientDisconnected(connection.clone()));
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send to one connection. Returns false if it is unknown or not open.
    pub async fn send_to_one(&self, id: &str, payload: &MessagePayload) -> SessionResult<bool> {
        let Some(connection) = self.inner.registry.get(id) else {
            tracing::debug!(connection_id = %id, "Send to unknown connection ignored");
            return Ok(false);
        };
        if !connection.is_connected() {
            return Ok(false);
        }

        connection
            .send(payload)
            .await
            .map_err(|e| SessionError::connection_in(self.state(), e))?;
        Ok(true)
    }

    /// Send to every connected session
    pub async fn send_to_all(&self, payload: &MessagePayload) -> BroadcastReport {
        self.inner.broadcaster.broadcast(payload).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn state(&self) -> ServerState {
        self.inner.state.current()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn connected_count(&self) -> usize {
        self.inner.registry.connected_count()
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.inner.registry.connected_ids()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.registry.get(id)
    }

    pub fn list_all(&self) -> Vec<Arc<Connection>> {
        self.inner.registry.list_all()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Receive buffers currently rented by receive loops
    pub fn buffers_in_use(&self) -> usize {
        self.inner.buffers.outstanding()
    }

    pub fn set_relay_messages(&self, enabled: bool) {
        self.inner.relay.store(enabled, Ordering::Relaxed);
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        self.inner.events.subscribe()
    }
}

impl std::fmt::Debug for ServerConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnectionManager")
            .field("state", &self.state())
            .field("registry", &self.inner.registry)
            .field("receive_loops", &self.inner.receive_loops.len())
            .finish()
    }
}
