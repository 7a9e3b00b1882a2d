use redis::{aio::ConnectionManager, AsyncCommands, Client};

use crate::error::BusError;

/// Publishes JSON payloads on one pub/sub channel
///
/// Publishing goes through a multiplexed `ConnectionManager`, which
/// reconnects on its own; subscribing needs a dedicated connection and lives
/// in the bridge.
#[derive(Clone)]
pub struct BusPublisher {
    conn: ConnectionManager,
    channel: String,
}

impl BusPublisher {
    pub async fn connect(client: &Client, channel: impl Into<String>) -> Result<Self, BusError> {
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            conn,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns the number of subscribers that received the payload
    pub async fn publish(&self, payload: &str) -> Result<usize, BusError> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(&self.channel, payload).await?;
        Ok(receivers)
    }
}
