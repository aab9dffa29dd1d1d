//! Broadcast fan-out
//!
//! Sends one message to every connected session. Each send is isolated: a
//! failing session is logged and skipped, the others still receive the frame.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use wsession_core::{Connection, MessagePayload};

use crate::connection::ConnectionRegistry;

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Fan-out over a registry snapshot
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    /// Maximum sends in flight; `None` sends to everyone at once
    concurrency_limit: Option<usize>,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            concurrency_limit: None,
        }
    }

    /// Cap the number of concurrent sends per broadcast
    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit.max(1));
        self
    }

    pub fn concurrency_limit(&self) -> Option<usize> {
        self.concurrency_limit
    }

    /// Send `payload` to every connected session and wait for all sends
    pub async fn broadcast(&self, payload: &MessagePayload) -> BroadcastReport {
        let targets = self.registry.connected_snapshot();
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        // Owned per-target futures keep the fan-out spawnable
        let sends: Vec<BoxFuture<'static, bool>> = targets
            .into_iter()
            .map(|conn| {
                let payload = payload.clone();
                async move { send_one(&conn, &payload).await }.boxed()
            })
            .collect();
        let results: Vec<bool> = match self.concurrency_limit {
            None => futures::future::join_all(sends).await,
            Some(limit) => stream::iter(sends).buffer_unordered(limit).collect().await,
        };

        let delivered = results.iter().filter(|ok| **ok).count();
        let report = BroadcastReport {
            delivered,
            failed: results.len() - delivered,
        };

        tracing::debug!(
            delivered = report.delivered,
            failed = report.failed,
            kind = ?payload.kind(),
            "Broadcast complete"
        );

        report
    }

    /// Broadcast in the background.
    ///
    /// The send runs in its own task; a supervisor task awaits it and logs a
    /// panic instead of letting it reach the caller.
    pub fn spawn_broadcast(&self, payload: MessagePayload) -> JoinHandle<()> {
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.broadcast(&payload).await });

        tokio::spawn(async move {
            match task.await {
                Ok(report) if report.failed > 0 => {
                    tracing::debug!(failed = report.failed, "Background broadcast had failures");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Background broadcast task failed");
                }
            }
        })
    }
}

async fn send_one(connection: &Arc<Connection>, payload: &MessagePayload) -> bool {
    match connection.send(payload).await {
        Ok(()) => {
            tracing::trace!(connection_id = %connection.id(), "Broadcast frame sent");
            true
        }
        Err(e) => {
            tracing::warn!(
                connection_id = %connection.id(),
                error = %e,
                "Broadcast send failed"
            );
            false
        }
    }
}

impl std::fmt::Debug for BroadcastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastEngine")
            .field("concurrency_limit", &self.concurrency_limit)
            .finish()
    }
}
