//! Connection Registry
//!
//! Maps a user identity to the live connections of that user (one per open
//! tab or device). Handlers register on open and unregister on teardown; the
//! bus bridge fans events out through `send_to`.
//!
//! The registry never owns a socket. Each entry is a `ConnectionHandle`: the
//! sending half of the connection's bounded outbound queue plus a terminate
//! signal the owning task watches.

use chrono::{DateTime, Utc};
use event_schema::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch, RwLock,
};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::metrics;

/// Unique identifier of one WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Registry-side reference to a connection owned by its handler task
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: String,
    created_at: DateTime<Utc>,
    outbound: mpsc::Sender<ServerMessage>,
    terminate: Arc<watch::Sender<bool>>,
}

/// Receiving halves kept by the task that owns the socket
pub struct ConnectionChannels {
    pub outbound: mpsc::Receiver<ServerMessage>,
    pub terminate: watch::Receiver<bool>,
}

impl ConnectionHandle {
    /// Create a handle and the channels its owning task reads from
    pub fn new(user_id: impl Into<String>, buffer: usize) -> (Self, ConnectionChannels) {
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer.max(1));
        let (terminate_tx, terminate_rx) = watch::channel(false);

        let handle = Self {
            id: ConnectionId::new(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            outbound: outbound_tx,
            terminate: Arc::new(terminate_tx),
        };
        let channels = ConnectionChannels {
            outbound: outbound_rx,
            terminate: terminate_rx,
        };
        (handle, channels)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the owning task still reads from the outbound queue
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed() && !*self.terminate.borrow()
    }

    /// Ask the owning task to drop the socket without a close handshake
    pub fn terminate(&self) {
        self.terminate.send_replace(true);
    }

    fn try_push(&self, message: ServerMessage) -> Result<(), TrySendError<ServerMessage>> {
        self.outbound.try_send(message)
    }
}

/// Outcome of a `send_to` call
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the frame was queued on
    pub delivered: usize,
    /// Connections found closed or whose queue was full
    pub skipped: Vec<ConnectionId>,
}

impl DeliveryReport {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.skipped.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    // user_id -> live connections, in registration order
    inner: Arc<RwLock<HashMap<String, Vec<ConnectionHandle>>>>,
    max_per_user: Option<usize>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that refuses more than `limit` concurrent connections per user
    pub fn with_connection_limit(limit: Option<usize>) -> Self {
        Self {
            inner: Arc::default(),
            max_per_user: limit,
        }
    }

    /// Add a connection under its user. Registering the same handle twice is a no-op.
    ///
    /// Returns `true` when the handle was newly added.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<bool, RegistryError> {
        let mut guard = self.inner.write().await;
        let connections = guard.entry(handle.user_id.clone()).or_default();

        if connections.iter().any(|c| c.id == handle.id) {
            return Ok(false);
        }

        if let Some(limit) = self.max_per_user {
            if connections.len() >= limit {
                let user_id = handle.user_id.clone();
                if connections.is_empty() {
                    guard.remove(&user_id);
                }
                return Err(RegistryError::TooManyConnections { user_id, limit });
            }
        }

        tracing::debug!(
            user_id = %handle.user_id,
            connection_id = %handle.id,
            total = connections.len() + 1,
            "Registered connection"
        );
        connections.push(handle);
        metrics::connection_opened();
        Ok(true)
    }

    /// Remove a connection; drops the user entry once its last connection is gone.
    ///
    /// Returns `true` when the connection was present.
    pub async fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;

        let Some(connections) = guard.get_mut(user_id) else {
            return false;
        };

        let before = connections.len();
        connections.retain(|c| c.id != connection_id);
        let removed = connections.len() != before;

        if connections.is_empty() {
            guard.remove(user_id);
            tracing::debug!(user_id = %user_id, "Removed user with no remaining connections");
        }

        if removed {
            metrics::connection_closed();
            tracing::debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Unregistered connection"
            );
        }
        removed
    }

    /// Queue `message` on every open connection of `user_id`
    ///
    /// Best effort: closed connections are skipped, and a connection whose
    /// outbound queue is full is told to terminate. A user without
    /// connections yields an empty report.
    pub async fn send_to(&self, user_id: &str, message: ServerMessage) -> DeliveryReport {
        let guard = self.inner.read().await;
        let mut report = DeliveryReport::default();

        let Some(connections) = guard.get(user_id) else {
            return report;
        };

        for handle in connections {
            if !handle.is_open() {
                report.skipped.push(handle.id);
                continue;
            }

            match handle.try_push(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        user_id = %user_id,
                        connection_id = %handle.id,
                        "Outbound buffer full, terminating connection"
                    );
                    handle.terminate();
                    report.skipped.push(handle.id);
                }
                Err(TrySendError::Closed(_)) => report.skipped.push(handle.id),
            }
        }

        metrics::frames_delivered(report.delivered);
        report
    }

    /// Signal every live connection to terminate. Used at shutdown.
    pub async fn terminate_all(&self) -> usize {
        let guard = self.inner.read().await;
        let mut count = 0;
        for handle in guard.values().flatten() {
            handle.terminate();
            count += 1;
        }
        count
    }

    pub async fn connection_count(&self, user_id: &str) -> usize {
        let guard = self.inner.read().await;
        guard.get(user_id).map(|v| v.len()).unwrap_or(0)
    }

    pub async fn is_registered(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(user_id)
            .map(|v| v.iter().any(|c| c.id == connection_id))
            .unwrap_or(false)
    }

    pub async fn total_connections(&self) -> usize {
        let guard = self.inner.read().await;
        guard.values().map(|v| v.len()).sum()
    }

    pub async fn connected_users_count(&self) -> usize {
        let guard = self.inner.read().await;
        guard.len()
    }
}
