//! Session integration tests over in-memory transports
//!
//! Client and server managers run in one process, linked by
//! `MemoryTransport` pairs. No sockets are needed.
//!
//! Run with: cargo test -p integration-tests --test session_tests

use std::sync::Arc;

use async_trait::async_trait;
use integration_tests::{next_event, quiet_settings, test_options, wait_until, MemoryLink};
use wsession_client::ClientConnectionManager;
use tokio::sync::watch;
use wsession_core::{
    ClientEvent, ClientState, CloseCode, MemoryTransport, MessageKind, MessagePayload,
    MessageTransport, Received, ServerEvent, ServerState, TransportError, TransportState,
};
use wsession_server::{ServerConnectionManager, ServerSettings};

fn running_server() -> ServerConnectionManager {
    let server = ServerConnectionManager::with_settings(test_options(), quiet_settings());
    server.start().unwrap();
    server
}

fn linked_client(server: &ServerConnectionManager) -> ClientConnectionManager {
    ClientConnectionManager::with_connector(test_options(), MemoryLink::new(server.clone()))
}

async fn peer_receive(peer: &MemoryTransport) -> Received {
    let mut buf = vec![0u8; 128 * 1024];
    tokio::time::timeout(integration_tests::TEST_TIMEOUT, peer.receive(&mut buf))
        .await
        .expect("timed out waiting for frame")
        .unwrap()
}

/// Memory transport whose close blocks until the gate opens
struct GatedClose {
    inner: MemoryTransport,
    gate: watch::Sender<bool>,
}

impl GatedClose {
    fn new(inner: MemoryTransport) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gate: watch::channel(false).0,
        })
    }

    fn open_gate(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl MessageTransport for GatedClose {
    async fn receive(&self, buffer: &mut [u8]) -> Result<Received, TransportError> {
        self.inner.receive(buffer).await
    }

    async fn send(&self, payload: &MessagePayload) -> Result<(), TransportError> {
        self.inner.send(payload).await
    }

    fn state(&self) -> TransportState {
        self.inner.state()
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.inner.close(code, reason).await
    }

    async fn release(&self) {
        self.inner.release().await;
    }
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_ping_ack_round_trip() {
    let server = running_server();
    let mut server_events = server.subscribe();

    let client = linked_client(&server);
    let mut client_events = client.subscribe();

    client.connect().await.unwrap();
    assert_eq!(client.state(), ClientState::Connected);

    client.send_text("ping").await.unwrap();
    let event = next_event(&mut server_events, |e| matches!(e, ServerEvent::MessageReceived { .. }))
        .await
        .unwrap();
    let ServerEvent::MessageReceived { message, .. } = event else { unreachable!() };
    assert_eq!(message.text(), "ping");
    assert_eq!(server.connected_count(), 1);

    let report = server.send_to_all(&MessagePayload::from("ack")).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);

    let event = next_event(&mut client_events, |e| matches!(e, ClientEvent::MessageReceived(_)))
        .await
        .unwrap();
    let ClientEvent::MessageReceived(message) = event else { unreachable!() };
    assert_eq!(message.text(), "ack");

    client.disconnect().await;
    assert!(wait_until(|| server.connected_count() == 0).await);

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_relay_reaches_other_clients() {
    let server = ServerConnectionManager::new(test_options());
    server.start().unwrap();

    let sender = linked_client(&server);
    let listener = linked_client(&server);
    let mut listener_events = listener.subscribe();

    sender.connect().await.unwrap();
    listener.connect().await.unwrap();
    assert_eq!(server.connected_count(), 2);

    sender.send_text("hello all").await.unwrap();

    let event = next_event(&mut listener_events, |e| matches!(e, ClientEvent::MessageReceived(_)))
        .await
        .unwrap();
    let ClientEvent::MessageReceived(message) = event else { unreachable!() };
    assert_eq!(message.text(), "hello all");

    server.stop().await;
}

#[tokio::test]
async fn test_server_stop_disconnects_clients() {
    let server = running_server();
    let client = linked_client(&server);
    let mut client_events = client.subscribe();
    client.connect().await.unwrap();

    server.stop().await;

    let event = next_event(&mut client_events, |e| matches!(e, ClientEvent::ConnectionClosed { .. }))
        .await
        .unwrap();
    let ClientEvent::ConnectionClosed { reason } = event else { unreachable!() };
    assert_eq!(reason, "Closed by server");
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(server.connected_count(), 0);
}

// ============================================================================
// Acceptance
// ============================================================================

#[tokio::test]
async fn test_connect_rejected_while_stopped() {
    let server = ServerConnectionManager::with_settings(test_options(), quiet_settings());
    let link = MemoryLink::new(server.clone());
    let client = ClientConnectionManager::with_connector(test_options(), link.clone());

    let err = client.connect().await.unwrap_err();
    assert_eq!(err.code(), "CONNECTION_ERROR");
    assert_eq!(client.state(), ClientState::Faulted);
    assert_eq!(link.attempts(), 1);
    assert!(server.list_all().is_empty());
}

#[tokio::test]
async fn test_rejected_transport_receives_close() {
    let server = ServerConnectionManager::with_settings(test_options(), quiet_settings());
    let (local, peer) = MemoryTransport::pair();

    assert!(server.handle_incoming_connection(Arc::new(local)).await.is_err());
    assert!(server.list_all().is_empty());

    let Received::Close { code, reason } = peer_receive(&peer).await else {
        panic!("expected close frame");
    };
    assert_eq!(code, Some(1001));
    assert_eq!(reason, "Server not accepting connections");
}

#[tokio::test]
async fn test_connect_rejected_while_faulted() {
    let server = running_server();
    assert!(server.fault("listener failed"));
    assert_eq!(server.state(), ServerState::Faulted);

    let (local, peer) = MemoryTransport::pair();
    let err = server.handle_incoming_connection(Arc::new(local)).await.unwrap_err();
    assert!(err.is_state());
    assert!(server.list_all().is_empty());

    let Received::Close { code, .. } = peer_receive(&peer).await else {
        panic!("expected close frame");
    };
    assert_eq!(code, Some(1001));

    let link = MemoryLink::new(server.clone());
    let client = ClientConnectionManager::with_connector(test_options(), link.clone());
    assert!(client.connect().await.is_err());
    assert_eq!(link.attempts(), 1);
    assert!(server.list_all().is_empty());
}

#[tokio::test]
async fn test_connect_rejected_while_stopping() {
    let server = running_server();
    let mut events = server.subscribe();

    // Keeps stop() parked in Stopping until the gate opens
    let (held, _held_peer) = MemoryTransport::pair();
    let held = GatedClose::new(held);
    let held_id = server
        .handle_incoming_connection(held.clone())
        .await
        .unwrap()
        .id()
        .to_string();

    let stopping = tokio::spawn({
        let server = server.clone();
        async move { server.stop().await }
    });
    next_event(&mut events, |e| {
        matches!(e, ServerEvent::StateChanged(t) if t.new_state == ServerState::Stopping)
    })
    .await
    .unwrap();
    assert_eq!(server.state(), ServerState::Stopping);

    let (local, peer) = MemoryTransport::pair();
    let err = server.handle_incoming_connection(Arc::new(local)).await.unwrap_err();
    assert!(err.is_state());
    assert!(server.list_all().iter().all(|c| c.id() == held_id));

    let Received::Close { code, reason } = peer_receive(&peer).await else {
        panic!("expected close frame");
    };
    assert_eq!(code, Some(1001));
    assert_eq!(reason, "Server not accepting connections");

    held.open_gate();
    tokio::time::timeout(integration_tests::TEST_TIMEOUT, stopping)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.list_all().is_empty());
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_broadcast_isolates_failing_send() {
    const SESSIONS: usize = 5;

    let server = running_server();
    let mut server_ends = Vec::new();
    let mut peers = Vec::new();

    for _ in 0..SESSIONS {
        let (local, peer) = MemoryTransport::pair();
        let local = Arc::new(local);
        server.handle_incoming_connection(local.clone()).await.unwrap();
        server_ends.push(local);
        peers.push(peer);
    }

    server_ends[2].set_fail_sends(true);

    let report = server.send_to_all(&MessagePayload::from("fan-out")).await;
    assert_eq!(report.delivered, SESSIONS - 1);
    assert_eq!(report.failed, 1);

    for (i, peer) in peers.iter().enumerate() {
        if i == 2 {
            continue;
        }
        assert!(matches!(
            peer_receive(peer).await,
            Received::Fragment { len: 7, kind: MessageKind::Text, end_of_message: true }
        ));
    }

    // The failing session stays registered
    assert_eq!(server.connected_count(), SESSIONS);
    server.stop().await;
}

// ============================================================================
// Size ceiling
// ============================================================================

#[tokio::test]
async fn test_oversized_message_closes_only_its_connection() {
    let options = wsession_core::ConnectionOptions::builder()
        .receive_buffer_size(1024)
        .max_message_size(4096)
        .build()
        .unwrap();
    let server = ServerConnectionManager::with_settings(options, quiet_settings());
    server.start().unwrap();
    let mut server_events = server.subscribe();

    let (bad_local, bad_peer) = MemoryTransport::pair();
    let (good_local, good_peer) = MemoryTransport::pair();
    let bad = server.handle_incoming_connection(Arc::new(bad_local)).await.unwrap();
    let good = server.handle_incoming_connection(Arc::new(good_local)).await.unwrap();

    bad_peer.send_fragment(vec![1u8; 3000], MessageKind::Binary, false).unwrap();
    bad_peer.send_fragment(vec![1u8; 3000], MessageKind::Binary, true).unwrap();

    let event = next_event(&mut server_events, |e| matches!(e, ServerEvent::ConnectionError { .. }))
        .await
        .unwrap();
    let ServerEvent::ConnectionError { connection_id, error } = event else { unreachable!() };
    assert_eq!(connection_id, bad.id());
    assert!(error.is_capacity());

    assert!(matches!(
        peer_receive(&bad_peer).await,
        Received::Close { code: Some(1009), .. }
    ));
    assert!(wait_until(|| server.get_by_id(bad.id()).is_none()).await);

    // The other session is untouched
    assert!(good.is_connected());
    assert_eq!(server.connected_ids(), vec![good.id().to_string()]);
    good_peer.send_fragment("still here", MessageKind::Text, true).unwrap();
    let event = next_event(&mut server_events, |e| matches!(e, ServerEvent::MessageReceived { .. }))
        .await
        .unwrap();
    let ServerEvent::MessageReceived { message, .. } = event else { unreachable!() };
    assert_eq!(message.text(), "still here");

    server.stop().await;
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn test_cleanup_twice_changes_count_once() {
    let server = running_server();
    let mut server_events = server.subscribe();

    let (first, _first_peer) = MemoryTransport::pair();
    let (second, _second_peer) = MemoryTransport::pair();
    let connection = server.handle_incoming_connection(Arc::new(first)).await.unwrap();
    server.handle_incoming_connection(Arc::new(second)).await.unwrap();
    assert_eq!(server.connected_count(), 2);

    server.cleanup(&connection).await;
    assert_eq!(server.connected_count(), 1);

    server.cleanup(&connection).await;
    assert_eq!(server.connected_count(), 1);

    next_event(&mut server_events, |e| matches!(e, ServerEvent::ClientDisconnected(_)))
        .await
        .unwrap();
    let extra = tokio::time::timeout(std::time::Duration::from_millis(100), async {
        next_event(&mut server_events, |e| matches!(e, ServerEvent::ClientDisconnected(_))).await
    })
    .await;
    assert!(extra.is_err(), "second cleanup must not publish");

    server.stop().await;
}

// ============================================================================
// Reassembly
// ============================================================================

#[tokio::test]
async fn test_fragmented_messages_reassemble() {
    let server = running_server();
    let mut server_events = server.subscribe();
    let (local, peer) = MemoryTransport::pair();
    server.handle_incoming_connection(Arc::new(local)).await.unwrap();

    let original: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

    for k in [1usize, 2, 5, 50] {
        // Uneven, non-empty pieces
        let mut cuts: Vec<usize> = (1..k).map(|i| i * original.len() / k + i % 3).collect();
        cuts.push(original.len());
        let mut start = 0;
        for (i, end) in cuts.iter().copied().enumerate() {
            peer.send_fragment(original[start..end].to_vec(), MessageKind::Binary, i == k - 1)
                .unwrap();
            start = end;
        }

        let event = next_event(&mut server_events, |e| matches!(e, ServerEvent::MessageReceived { .. }))
            .await
            .unwrap();
        let ServerEvent::MessageReceived { message, .. } = event else { unreachable!() };
        assert_eq!(message.content.as_bytes(), &original[..], "k = {k}");
        assert_eq!(message.text(), "[BINARY DATA]");
    }

    server.stop().await;
}

#[tokio::test]
async fn test_receive_buffers_return_to_pool() {
    let server = running_server();

    for _ in 0..10 {
        let client = linked_client(&server);
        client.connect().await.unwrap();
        client.disconnect().await;
    }

    assert!(wait_until(|| server.connected_count() == 0 && server.buffers_in_use() == 0).await);
    server.stop().await;
}

#[tokio::test]
async fn test_stop_then_restart() {
    let server = ServerConnectionManager::with_settings(
        test_options(),
        ServerSettings {
            relay_messages: false,
            ..ServerSettings::default()
        },
    );
    server.start().unwrap();
    server.stop().await;
    server.start().unwrap();

    let client = linked_client(&server);
    client.connect().await.unwrap();
    assert_eq!(server.connected_count(), 1);

    server.stop().await;
}
