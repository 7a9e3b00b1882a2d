//! Client Delivery Agent
//!
//! Keeps a local notification list in sync with the realtime service: one
//! live WebSocket per agent, reconnect with capped backoff, and HTTP polling
//! while the live connection is down.

pub mod agent;
pub mod api;
pub mod backoff;
pub mod config;
pub mod error;
pub mod fallback;
pub mod feed;

pub use agent::{AgentHandle, ConnectionState, DeliveryAgent};
pub use api::{HttpNotificationApi, NotificationApi};
pub use backoff::{Backoff, BackoffConfig};
pub use config::ClientConfig;
pub use error::ClientError;
pub use fallback::PollingFallback;
pub use feed::{NotificationFeed, NotificationItem, SharedFeed};
