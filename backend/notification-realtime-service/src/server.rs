use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::{BusPublisher, EventBusBridge};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::routes::build_router;
use crate::services::{BusReadReceipts, LogOnlyReadReceipts, ReadReceiptSink};
use crate::state::AppState;
use crate::websocket::ConnectionRegistry;

pub struct NotificationServer {
    config: Config,
}

impl NotificationServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Subscribe to the bus, bind the listener and start accepting upgrades
    ///
    /// A failed initial subscription is fatal; later subscription losses are
    /// retried by the bridge.
    pub async fn start(self) -> Result<ServerHandle> {
        let config = self.config;

        let client = redis::Client::open(config.redis.url.as_str())
            .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;

        let read_receipts: Arc<dyn ReadReceiptSink> = if config.read_receipts.publish {
            let publisher = BusPublisher::connect(&client, config.redis.ack_channel.clone())
                .await
                .map_err(|e| AppError::StartServer(format!("redis publisher: {e}")))?;
            Arc::new(BusReadReceipts::new(publisher))
        } else {
            Arc::new(LogOnlyReadReceipts)
        };

        let channel = config.redis.channel.clone();
        let addr = config.listen_addr();
        let state = AppState::new(config, read_receipts);

        let bridge = EventBusBridge::new(state.registry.clone(), channel);
        let pubsub = bridge
            .subscribe(&client)
            .await
            .map_err(|e| AppError::StartServer(format!("redis subscribe: {e}")))?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::StartServer(format!("bind {addr}: {e}")))?;

        let mut handle = ServerHandle::serve(listener, state)?;
        let shutdown = handle.state.shutdown_signal();
        handle.bridge = Some(tokio::spawn(bridge.run(client, pubsub, shutdown)));

        Ok(handle)
    }
}

/// A running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: AppState,
    server: JoinHandle<std::io::Result<()>>,
    bridge: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Serve on an already bound listener. No bus subscription is attached.
    pub fn serve(listener: TcpListener, state: AppState) -> Result<Self> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| AppError::StartServer(format!("listener address: {e}")))?;

        let app = build_router(state.clone());
        let mut shutdown = state.shutdown_signal();

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while !*shutdown.borrow() {
                        if shutdown.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await
        });

        info!(
            addr = %local_addr,
            ws_path = %state.config.server.ws_path,
            "Notification realtime service listening"
        );

        Ok(Self {
            local_addr,
            state,
            server,
            bridge: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.state.registry
    }

    /// Stop accepting, terminate live connections and stop the bridge
    pub async fn shutdown(self) -> Result<()> {
        if !self.state.trigger_shutdown() {
            warn!("Shutdown already in progress");
        }

        let terminated = self.state.registry.terminate_all().await;
        info!(terminated, "Terminated live connections");

        if let Some(bridge) = self.bridge {
            if let Err(e) = bridge.await {
                warn!(error = %e, "Event bus bridge task failed");
            }
        }

        match self.server.await {
            Ok(Ok(())) => {
                info!("Server stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(AppError::Internal(format!("server: {e}"))),
            Err(e) => Err(AppError::Internal(format!("server task: {e}"))),
        }
    }
}
