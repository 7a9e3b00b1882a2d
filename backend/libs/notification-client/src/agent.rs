//! Live connection loop
//!
//! `DeliveryAgent::spawn` starts two tasks: the connection loop, which keeps
//! one WebSocket open and applies inbound frames to the feed, and the
//! polling fallback, which covers the periods the socket is down.

use event_schema::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::api::NotificationApi;
use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::fallback::{load_feed, PollingFallback};
use crate::feed::{NotificationFeed, SharedFeed};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTGOING_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

pub struct DeliveryAgent {
    config: ClientConfig,
    api: Arc<dyn NotificationApi>,
    feed: SharedFeed,
    state: watch::Sender<ConnectionState>,
}

impl DeliveryAgent {
    pub fn new(config: ClientConfig, api: Arc<dyn NotificationApi>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            config,
            api,
            feed: NotificationFeed::shared(),
            state,
        }
    }

    /// Start the connection loop and the polling fallback
    pub fn spawn(self) -> AgentHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_BUFFER);

        let fallback = PollingFallback::new(
            self.api.clone(),
            self.feed.clone(),
            self.state.subscribe(),
            &self.config,
        );
        let fallback_task = tokio::spawn(fallback.run(shutdown_rx.clone()));

        let feed = self.feed.clone();
        let state = self.state.subscribe();
        let live_task = tokio::spawn(self.run(outgoing_rx, shutdown_rx));

        AgentHandle {
            feed,
            state,
            outgoing: outgoing_tx,
            shutdown: shutdown_tx,
            tasks: vec![live_task, fallback_task],
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Live connection state");
        }
    }

    async fn run(
        self,
        mut outgoing: mpsc::Receiver<ClientMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        while !*shutdown.borrow() {
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                result = self.connect() => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(socket) => {
                    backoff.reset();
                    self.set_state(ConnectionState::Open);
                    info!("Live notification connection open");

                    // Catch up on anything published while disconnected
                    match load_feed(self.api.as_ref(), &self.feed, self.config.page_size).await {
                        Ok(count) => debug!(count, "Loaded notification list"),
                        Err(e) => warn!(error = %e, "Failed to load notification list"),
                    }

                    match self.session(socket, &mut outgoing, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Dropped(reason) => {
                            warn!(reason = %reason, "Live notification connection lost");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Failed to open live notification connection"),
            }

            self.set_state(ConnectionState::Closed);

            let delay = backoff.next_delay();
            info!(
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Closed);
        debug!("Delivery agent stopped");
    }

    async fn connect(&self) -> Result<Socket, ClientError> {
        let token = self.api.fetch_ws_token().await?;
        let (socket, _) = connect_async(self.config.ws_url_with_token(&token)?).await?;
        Ok(socket)
    }

    async fn session(
        &self,
        socket: Socket,
        outgoing: &mut mpsc::Receiver<ClientMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();
        let keepalive_every = self.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + keepalive_every, keepalive_every);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let idle_timeout = self.config.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            let outbound = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                    continue;
                }
                Some(message) = outgoing.recv() => message,
                _ = keepalive.tick() => ClientMessage::Ping,
                _ = &mut idle => {
                    return SessionEnd::Dropped(format!("no traffic from server for {idle_timeout:?}"));
                }
                incoming = stream.next() => {
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.on_frame(&text).await,
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("closed by server ({})", u16::from(f.code)))
                                .unwrap_or_else(|| "closed by server".to_string());
                            return SessionEnd::Dropped(reason);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                        None => return SessionEnd::Dropped("stream ended".to_string()),
                    }
                    continue;
                }
            };

            let text = match outbound.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize client frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                return SessionEnd::Dropped(e.to_string());
            }
        }
    }

    async fn on_frame(&self, text: &str) {
        let frame = match ServerMessage::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable server frame");
                return;
            }
        };

        match &frame {
            ServerMessage::Connection { user_id, .. } => {
                info!(user_id = %user_id, "Live connection acknowledged");
            }
            ServerMessage::Pong { timestamp } => debug!(timestamp, "Pong"),
            _ => {
                let changed = self.feed.write().await.apply(&frame);
                debug!(kind = frame.kind(), changed, "Applied server frame");
            }
        }
    }
}

/// Running agent
pub struct AgentHandle {
    feed: SharedFeed,
    state: watch::Receiver<ConnectionState>,
    outgoing: mpsc::Sender<ClientMessage>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn feed(&self) -> SharedFeed {
        self.feed.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Tell the server a notification was read; every open tab is updated
    pub async fn mark_read(&self, id: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientMessage::MarkRead { id: id.into() }).await
    }

    pub async fn delete(&self, id: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientMessage::Delete { id: id.into() }).await
    }

    async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        self.outgoing
            .send(message)
            .await
            .map_err(|_| ClientError::Stopped)
    }

    /// Close the live connection and stop polling
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Delivery agent task failed");
            }
        }
    }
}
