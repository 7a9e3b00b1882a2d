//! Event Schema for the real-time notification channel
//!
//! Defines the payloads that travel over the pub/sub bus (`NotificationEvent`)
//! and the JSON frames exchanged over the WebSocket (`ServerMessage`,
//! `ClientMessage`). Both the realtime service and the client agent depend on
//! this crate so that the wire format is defined in exactly one place.

// Bus payloads published by producers
pub mod events;
// WebSocket frames in both directions
pub mod messages;

pub use events::{EventError, NotificationEvent};
pub use messages::{ClientMessage, ConnectionStatus, ReadTargets, ServerMessage};

/// Well-known pub/sub channel notification producers publish to
pub const NOTIFICATION_CHANNEL: &str = "notifications";

/// Channel read receipts are republished on
pub const ACK_CHANNEL: &str = "notifications:acks";
