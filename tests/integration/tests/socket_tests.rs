//! Socket integration tests
//!
//! A real axum server on a loopback port, reached by the tokio-tungstenite
//! client connector.
//!
//! Run with: cargo test -p integration-tests --test socket_tests

use integration_tests::{next_event, wait_until, TestServer};
use reqwest::StatusCode;
use wsession_client::ClientConnectionManager;
use wsession_core::{ClientEvent, ClientState, MessagePayload, ServerEvent, ServerState};

#[tokio::test]
async fn test_ping_ack_over_websocket() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut server_events = server.manager.subscribe();

    let client = ClientConnectionManager::new(server.client_options());
    let mut client_events = client.subscribe();
    client.connect().await.unwrap();

    client.send_text("ping").await.unwrap();
    let event = next_event(&mut server_events, |e| matches!(e, ServerEvent::MessageReceived { .. }))
        .await
        .unwrap();
    let ServerEvent::MessageReceived { message, .. } = event else { unreachable!() };
    assert_eq!(message.text(), "ping");
    assert_eq!(server.manager.connected_count(), 1);

    let report = server.manager.send_to_all(&MessagePayload::from("ack")).await;
    assert_eq!(report.delivered, 1);

    let event = next_event(&mut client_events, |e| matches!(e, ClientEvent::MessageReceived(_)))
        .await
        .unwrap();
    let ClientEvent::MessageReceived(message) = event else { unreachable!() };
    assert_eq!(message.text(), "ack");

    client.disconnect().await;
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(wait_until(|| server.manager.connected_count() == 0).await);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_binary_message_over_websocket() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut server_events = server.manager.subscribe();

    let client = ClientConnectionManager::new(server.client_options());
    client.connect().await.unwrap();

    // Larger than one receive buffer
    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
    client.send_binary(data.clone()).await.unwrap();

    let event = next_event(&mut server_events, |e| matches!(e, ServerEvent::MessageReceived { .. }))
        .await
        .unwrap();
    let ServerEvent::MessageReceived { message, .. } = event else { unreachable!() };
    assert_eq!(message.content, MessagePayload::from(data));

    client.dispose().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = reqwest::get(format!("{}/health", server.base_url())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["state"], "Running");
    assert_eq!(body["connections"], 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_upgrade_refused_when_stopped() {
    let server = TestServer::start().await.expect("Failed to start server");
    server.manager.stop().await;
    assert_eq!(server.manager.state(), ServerState::Stopped);

    let client = ClientConnectionManager::new(server.client_options());
    let err = client.connect().await.unwrap_err();
    assert_eq!(err.code(), "CONNECTION_ERROR");
    assert_eq!(client.state(), ClientState::Faulted);
    assert!(server.manager.list_all().is_empty());

    let response = reqwest::get(format!("{}/health", server.base_url())).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = TestServer::start().await.expect("Failed to start server");

    let client = ClientConnectionManager::new(server.client_options());
    let mut client_events = client.subscribe();
    client.connect().await.unwrap();
    assert!(wait_until(|| server.manager.connected_count() == 1).await);

    let manager = server.manager.clone();
    server.shutdown().await.unwrap();
    assert_eq!(manager.state(), ServerState::Stopped);

    let event = next_event(&mut client_events, |e| matches!(e, ClientEvent::ConnectionClosed { .. }))
        .await
        .unwrap();
    let ClientEvent::ConnectionClosed { reason } = event else { unreachable!() };
    assert_eq!(reason, "Closed by server");
}
