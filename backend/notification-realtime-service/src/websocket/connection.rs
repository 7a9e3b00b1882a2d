//! Per-connection lifecycle
//!
//! One `ConnectionHandler` owns one upgraded socket. States advance
//! `Connecting -> Authenticated -> Open -> Closing -> Closed`; identity is
//! verified before the upgrade, so a handler starts `Authenticated`. Every
//! exit from the open loop funnels into `close`, which unregisters the
//! connection exactly once.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use event_schema::{ClientMessage, ReadTargets, ServerMessage};
use futures_util::{Sink, SinkExt, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, RegistryError, TransportError};
use crate::metrics;
use crate::services::ReadReceiptSink;
use crate::state::AppState;
use crate::websocket::registry::{ConnectionChannels, ConnectionHandle, ConnectionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Connecting, Closed)
                | (Authenticated, Open)
                | (Authenticated, Closing)
                | (Open, Closing)
                | (Closing, Closed)
        )
    }
}

/// Why a connection left the open state
#[derive(Debug)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// Registry refused the connection
    Rejected(RegistryError),
    /// Server shutdown or a full outbound queue
    Terminated,
    Transport(TransportError),
}

impl CloseReason {
    fn label(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::Rejected(_) => "rejected",
            CloseReason::Terminated => "terminated",
            CloseReason::Transport(TransportError::LivenessTimeout(_)) => "liveness_timeout",
            CloseReason::Transport(_) => "transport_error",
        }
    }
}

pub struct ConnectionHandler {
    handle: ConnectionHandle,
    registry: ConnectionRegistry,
    read_receipts: Arc<dyn ReadReceiptSink>,
    shutdown: watch::Receiver<bool>,
    ping_interval: Duration,
    max_missed_pongs: u32,
    state: ConnectionState,
    registered: bool,
}

impl ConnectionHandler {
    /// Handler for an already verified user
    pub fn new(user_id: impl Into<String>, app: &AppState) -> (Self, ConnectionChannels) {
        let ws = &app.config.websocket;
        let (handle, channels) = ConnectionHandle::new(user_id, ws.outbound_buffer);

        let mut handler = Self {
            handle,
            registry: app.registry.clone(),
            read_receipts: app.read_receipts.clone(),
            shutdown: app.shutdown_signal(),
            ping_interval: ws.ping_interval(),
            max_missed_pongs: ws.max_missed_pongs.max(1),
            state: ConnectionState::Connecting,
            registered: false,
        };
        handler.transition(ConnectionState::Authenticated);
        (handler, channels)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn user_id(&self) -> &str {
        self.handle.user_id()
    }

    fn transition(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            warn!(
                connection_id = %self.handle.id(),
                from = ?self.state,
                to = ?next,
                "Ignoring invalid connection state transition"
            );
            return;
        }
        debug!(connection_id = %self.handle.id(), from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }

    /// Drive the socket until it closes, then tear down
    pub async fn run(mut self, socket: WebSocket, channels: ConnectionChannels) {
        let (mut sink, mut stream) = socket.split();

        let reason = match self.open(&mut sink).await {
            Ok(()) => self.serve(&mut sink, &mut stream, channels).await,
            Err(reason) => reason,
        };

        match &reason {
            CloseReason::Rejected(_) => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: "too many connections".into(),
                    })))
                    .await;
            }
            CloseReason::Transport(TransportError::LivenessTimeout(_)) => {
                let _ = sink.send(Message::Close(None)).await;
            }
            // Terminated sockets are dropped without a close handshake
            _ => {}
        }

        self.close(reason).await;
    }

    async fn open<S>(&mut self, sink: &mut S) -> Result<(), CloseReason>
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
    {
        match self.registry.register(self.handle.clone()).await {
            Ok(_) => self.registered = true,
            Err(e) => {
                warn!(user_id = %self.user_id(), error = %e, "Connection rejected");
                metrics::observe_upgrade("rejected_limit");
                return Err(CloseReason::Rejected(e));
            }
        }

        self.transition(ConnectionState::Open);
        info!(
            user_id = %self.user_id(),
            connection_id = %self.handle.id(),
            "WebSocket connection open"
        );

        write_frame(sink, &ServerMessage::connected(self.user_id()))
            .await
            .map_err(CloseReason::Transport)
    }

    async fn serve<S, R>(
        &mut self,
        sink: &mut S,
        stream: &mut R,
        channels: ConnectionChannels,
    ) -> CloseReason
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
        R: futures_util::Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let ConnectionChannels {
            mut outbound,
            mut terminate,
        } = channels;

        if *self.shutdown.borrow() {
            return CloseReason::Terminated;
        }

        let mut heartbeat = interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut missed: u32 = 0;

        loop {
            tokio::select! {
                biased;

                changed = terminate.changed() => {
                    if changed.is_err() || *terminate.borrow() {
                        return CloseReason::Terminated;
                    }
                }

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return CloseReason::Terminated;
                    }
                }

                // Inbound and the heartbeat go ahead of a backed-up outbound queue
                incoming = stream.next() => {
                    let message = match incoming {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return CloseReason::Transport(TransportError::Read(e.to_string())),
                        None => return CloseReason::PeerClosed,
                    };
                    // Any traffic proves the peer is alive
                    missed = 0;

                    match message {
                        Message::Text(text) => {
                            if let Err(e) = self.on_text(&text, sink).await {
                                return CloseReason::Transport(e);
                            }
                        }
                        Message::Binary(_) => {
                            debug!(
                                connection_id = %self.handle.id(),
                                error = %ProtocolError::UnsupportedBinary,
                                "Ignoring frame"
                            );
                        }
                        Message::Ping(_) | Message::Pong(_) => {}
                        Message::Close(_) => return CloseReason::PeerClosed,
                    }
                }

                _ = heartbeat.tick() => {
                    if missed >= self.max_missed_pongs {
                        return CloseReason::Transport(TransportError::LivenessTimeout(missed));
                    }
                    missed += 1;
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        return CloseReason::Transport(TransportError::Write(e.to_string()));
                    }
                }

                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        return CloseReason::Terminated;
                    };
                    if let Err(e) = write_frame(sink, &frame).await {
                        return CloseReason::Transport(e);
                    }
                }
            }
        }
    }

    async fn on_text<S>(&self, text: &str, sink: &mut S) -> Result<(), TransportError>
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
    {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    user_id = %self.user_id(),
                    connection_id = %self.handle.id(),
                    error = %ProtocolError::MalformedFrame(e),
                    "Ignoring client frame"
                );
                return Ok(());
            }
        };

        match message {
            ClientMessage::Ping => write_frame(sink, &ServerMessage::pong()).await,
            ClientMessage::MarkRead { id } => {
                self.record_read(id.clone());
                self.registry
                    .send_to(
                        self.user_id(),
                        ServerMessage::MarkRead {
                            ids: ReadTargets::Ids(vec![id]),
                        },
                    )
                    .await;
                Ok(())
            }
            ClientMessage::Delete { id } => {
                self.registry
                    .send_to(self.user_id(), ServerMessage::Delete { id })
                    .await;
                Ok(())
            }
            ClientMessage::Unknown => {
                debug!(connection_id = %self.handle.id(), "Ignoring unrecognized frame type");
                Ok(())
            }
        }
    }

    fn record_read(&self, notification_id: String) {
        let sink = self.read_receipts.clone();
        let user_id = self.user_id().to_string();

        tokio::spawn(async move {
            if let Err(e) = sink.mark_read(&user_id, &notification_id).await {
                warn!(
                    user_id = %user_id,
                    notification_id = %notification_id,
                    error = %e,
                    "Failed to record read receipt"
                );
            }
        });
    }

    async fn close(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.transition(ConnectionState::Closing);

        if self.registered {
            self.registry
                .unregister(self.handle.user_id(), self.handle.id())
                .await;
            self.registered = false;
        }

        self.transition(ConnectionState::Closed);

        match &reason {
            CloseReason::Transport(e) => info!(
                user_id = %self.user_id(),
                connection_id = %self.handle.id(),
                reason = reason.label(),
                error = %e,
                "WebSocket connection closed"
            ),
            _ => info!(
                user_id = %self.user_id(),
                connection_id = %self.handle.id(),
                reason = reason.label(),
                "WebSocket connection closed"
            ),
        }
    }
}

async fn write_frame<S>(sink: &mut S, frame: &ServerMessage) -> Result<(), TransportError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let text = match frame.to_json() {
        Ok(text) => text,
        Err(e) => {
            warn!(kind = frame.kind(), error = %e, "Failed to serialize frame");
            return Ok(());
        }
    };

    sink.send(Message::Text(text))
        .await
        .map_err(|e| TransportError::Write(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_lifecycle_transitions() {
        assert!(Connecting.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Open));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(Authenticated.can_transition_to(Closing));
    }

    #[test]
    fn test_closed_is_terminal() {
        for next in [Connecting, Authenticated, Open, Closing, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
        assert!(!Open.can_transition_to(Authenticated));
        assert!(!Connecting.can_transition_to(Open));
    }

    #[test]
    fn test_new_handler_starts_authenticated() {
        let state = AppState::new(
            crate::config::Config::test_defaults(),
            Arc::new(crate::services::LogOnlyReadReceipts),
        );
        let (handler, _channels) = ConnectionHandler::new("A", &state);
        assert_eq!(handler.state(), Authenticated);
    }

    #[tokio::test]
    async fn test_outbound_backlog_does_not_starve_inbound() {
        let state = AppState::new(
            crate::config::Config::test_defaults(),
            Arc::new(crate::services::LogOnlyReadReceipts),
        );
        let (mut handler, channels) = ConnectionHandler::new("A", &state);
        let mut sink: Vec<Message> = Vec::new();
        handler.open(&mut sink).await.unwrap();

        for _ in 0..state.config.websocket.outbound_buffer {
            state.registry.send_to("A", ServerMessage::pong()).await;
        }
        let mut stream = futures_util::stream::iter(vec![Ok::<_, axum::Error>(Message::Close(None))]);

        let reason = handler.serve(&mut sink, &mut stream, channels).await;
        assert!(matches!(reason, CloseReason::PeerClosed));
        // Only the connection frame went out before the close was seen
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_close_reason_labels() {
        assert_eq!(
            CloseReason::Transport(TransportError::LivenessTimeout(2)).label(),
            "liveness_timeout"
        );
        assert_eq!(CloseReason::PeerClosed.label(), "peer_closed");
    }
}
