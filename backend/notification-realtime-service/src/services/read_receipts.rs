//! Read receipts
//!
//! A `mark_read` frame from a client is acknowledged to the rest of the
//! platform here. Callers spawn this off the connection task; failures are
//! logged and never reach the client.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::bus::BusPublisher;
use crate::error::BusError;

#[async_trait]
pub trait ReadReceiptSink: Send + Sync {
    async fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<(), BusError>;
}

/// Payload published on the acknowledgement channel
#[derive(Debug, Serialize)]
pub struct ReadReceipt<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "userId")]
    pub user_id: &'a str,
    pub id: &'a str,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl<'a> ReadReceipt<'a> {
    pub fn new(user_id: &'a str, notification_id: &'a str) -> Self {
        Self {
            kind: event_schema::events::KIND_MARK_READ,
            user_id,
            id: notification_id,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Publishes receipts on the acknowledgement channel for the persistence layer
pub struct BusReadReceipts {
    publisher: BusPublisher,
}

impl BusReadReceipts {
    pub fn new(publisher: BusPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl ReadReceiptSink for BusReadReceipts {
    async fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<(), BusError> {
        let payload = serde_json::to_string(&ReadReceipt::new(user_id, notification_id))
            .map_err(|e| BusError::InvalidEvent(e.into()))?;
        let receivers = self.publisher.publish(&payload).await?;

        info!(
            user_id = %user_id,
            notification_id = %notification_id,
            channel = %self.publisher.channel(),
            receivers,
            "Read receipt published"
        );
        Ok(())
    }
}

/// Records receipts in the log only
#[derive(Debug, Default)]
pub struct LogOnlyReadReceipts;

#[async_trait]
impl ReadReceiptSink for LogOnlyReadReceipts {
    async fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<(), BusError> {
        info!(user_id = %user_id, notification_id = %notification_id, "Notification marked read");
        Ok(())
    }
}
