//! Test helpers for integration tests
//!
//! Provides an in-memory connector, a loopback test server and event
//! waiting utilities.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use wsession_client::Connector;
use wsession_common::AppResult;
use wsession_core::{
    ConnectionOptions, MemoryTransport, MessageTransport, TransportError,
};
use wsession_server::{run_server, ServerConnectionManager, ServerSettings};

/// Default wait for anything asynchronous in a test
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Connector that links every client attempt straight into a server
/// manager through a memory transport pair
pub struct MemoryLink {
    server: ServerConnectionManager,
    attempts: Mutex<usize>,
}

impl MemoryLink {
    pub fn new(server: ServerConnectionManager) -> Arc<Self> {
        Arc::new(Self {
            server,
            attempts: Mutex::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl Connector for MemoryLink {
    async fn connect(
        &self,
        _options: &ConnectionOptions,
    ) -> Result<Arc<dyn MessageTransport>, TransportError> {
        *self.attempts.lock() += 1;
        let (client_end, server_end) = MemoryTransport::pair();
        self.server
            .handle_incoming_connection(Arc::new(server_end))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Arc::new(client_end))
    }
}

/// Options shared by the in-memory tests
pub fn test_options() -> ConnectionOptions {
    ConnectionOptions::builder()
        .receive_buffer_size(1024)
        .max_message_size(64 * 1024)
        .build()
        .expect("valid test options")
}

/// Server settings without relaying, so tests see only what they send
pub fn quiet_settings() -> ServerSettings {
    ServerSettings {
        relay_messages: false,
        ..ServerSettings::default()
    }
}

/// Running server on a loopback port
pub struct TestServer {
    pub addr: SocketAddr,
    pub manager: ServerConnectionManager,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<AppResult<()>>,
}

impl TestServer {
    /// Start a new test server
    pub async fn start() -> Result<Self> {
        Self::start_with_settings(quiet_settings()).await
    }

    /// Start a test server with custom settings
    pub async fn start_with_settings(settings: ServerSettings) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let options = ConnectionOptions::builder()
            .host("127.0.0.1")
            .port(addr.port())
            .build()?;
        let manager = ServerConnectionManager::with_settings(options, settings);
        manager.start()?;

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(run_server(manager.clone(), listener, async move {
            let _ = rx.await;
        }));

        Ok(Self {
            addr,
            manager,
            shutdown: Some(tx),
            handle,
        })
    }

    /// Options a client uses to reach this server
    pub fn client_options(&self) -> ConnectionOptions {
        ConnectionOptions::builder()
            .host("127.0.0.1")
            .port(self.addr.port())
            .auto_retry_connection(false)
            .build()
            .expect("valid client options")
    }

    /// Get base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signal shutdown and wait for the serve loop to finish
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), &mut self.handle)
            .await
            .context("server did not shut down")???;
        Ok(())
    }
}

/// Wait for the first event matching `pred`, skipping the others
pub async fn next_event<E, F>(rx: &mut mpsc::UnboundedReceiver<E>, mut pred: F) -> Result<E>
where
    F: FnMut(&E) -> bool,
{
    tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return Ok(event);
            }
        }
        anyhow::bail!("event bus closed")
    })
    .await
    .context("timed out waiting for event")?
}

/// Poll `condition` until it holds or the timeout passes
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
