//! Server setup
//!
//! Provides the HTTP router and the serve loop around a
//! [`ServerConnectionManager`].

mod handler;

pub use handler::{health_check, ws_handler};

use axum::{routing::get, Router};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use wsession_common::{AppConfig, AppError, AppResult};
use wsession_core::ServerEvent;

use crate::connection::{ServerConnectionManager, ServerSettings};

/// Create the router with the WebSocket endpoint at `path`
pub fn create_router(path: &str) -> Router<ServerConnectionManager> {
    Router::new()
        .route(path, get(ws_handler))
        .route("/health", get(health_check))
}

/// Build the complete application
pub fn create_app(manager: ServerConnectionManager) -> Router {
    let path = manager.options().path().to_string();
    create_router(&path)
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Serve on `listener` until `shutdown` resolves, then stop the manager.
///
/// A listener failure escalates the manager to Faulted.
pub async fn run_server<F>(
    manager: ServerConnectionManager,
    listener: TcpListener,
    shutdown: F,
) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("Listening on ws://{}{}", addr, manager.options().path());

    let app = create_app(manager.clone());
    let stopper = manager.clone();

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            stopper.stop().await;
        })
        .await;

    if let Err(e) = result {
        manager.fault(format!("Listener failed: {e}"));
        return Err(AppError::Io(e));
    }

    // Covers a serve loop that ended without the shutdown signal
    manager.stop().await;
    Ok(())
}

/// Log every server event
pub fn spawn_event_logger(manager: &ServerConnectionManager) -> tokio::task::JoinHandle<()> {
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                ServerEvent::StateChanged(t) => {
                    tracing::info!(from = %t.old_state, to = %t.new_state, reason = %t.reason, "Server state changed");
                }
                ServerEvent::MessageReceived { message, .. } => {
                    tracing::info!(
                        connection_id = %message.connection_id,
                        text = %message.text(),
                        "Message received"
                    );
                }
                ServerEvent::ConnectionError { connection_id, error } => {
                    tracing::warn!(connection_id = %connection_id, error = %error, "Connection error");
                }
                other => {
                    tracing::info!(event = other.name(), connection_id = ?other.connection_id(), "Server event");
                }
            }
        }
    })
}

/// Run the complete server with configuration until Ctrl-C
pub async fn run(config: AppConfig) -> AppResult<()> {
    let options = config.connection_options()?;
    let settings = ServerSettings {
        relay_messages: config.websocket.relay_messages,
        ..ServerSettings::default()
    };

    let manager = ServerConnectionManager::with_settings(options, settings);
    let logger = spawn_event_logger(&manager);

    let listener = TcpListener::bind(manager.options().address()).await?;
    manager.start()?;

    let result = run_server(manager, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    })
    .await;

    logger.abort();
    result
}
