use std::sync::Arc;
use tokio::sync::watch;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::services::ReadReceiptSink;
use crate::websocket::registry::ConnectionRegistry;

/// Shared state handed to every request handler and connection task
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub verifier: Arc<TokenVerifier>,
    pub read_receipts: Arc<dyn ReadReceiptSink>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(config: Config, read_receipts: Arc<dyn ReadReceiptSink>) -> Self {
        let registry =
            ConnectionRegistry::with_connection_limit(config.websocket.max_connections_per_user);
        let verifier = Arc::new(TokenVerifier::new(&config.auth));
        let (shutdown, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            registry,
            verifier,
            read_receipts,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Flips once the server starts shutting down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Returns false if shutdown had already been triggered
    pub fn trigger_shutdown(&self) -> bool {
        !self.shutdown.send_replace(true)
    }
}
