//! WebSocket frame types for real-time notifications

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::events::NotificationEvent;

/// Frames pushed from the server to a connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the connection is open
    Connection {
        status: ConnectionStatus,
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// A new notification for the user
    Notification { data: NotificationEvent },

    /// Notifications marked read elsewhere (another tab, the REST API)
    MarkRead { ids: ReadTargets },

    /// A notification was deleted
    Delete { id: String },

    /// Reply to a client `ping`, unix time in milliseconds
    Pong { timestamp: i64 },
}

impl ServerMessage {
    pub fn connected(user_id: impl Into<String>) -> Self {
        ServerMessage::Connection {
            status: ConnectionStatus::Connected,
            user_id: user_id.into(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Discriminator as it appears on the wire, used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connection { .. } => "connection",
            ServerMessage::Notification { .. } => "notification",
            ServerMessage::MarkRead { .. } => "mark_read",
            ServerMessage::Delete { .. } => "delete",
            ServerMessage::Pong { .. } => "pong",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
}

/// Frames sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Application-level keepalive
    Ping,

    /// The user has read notification `id`
    MarkRead { id: String },

    /// The user deleted notification `id` through the REST API
    Delete { id: String },

    /// Any discriminator this server does not know about
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Target of a `mark_read` frame: explicit ids or the literal `"all"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadTargets {
    All,
    Ids(Vec<String>),
}

impl ReadTargets {
    pub fn contains(&self, id: &str) -> bool {
        match self {
            ReadTargets::All => true,
            ReadTargets::Ids(ids) => ids.iter().any(|candidate| candidate == id),
        }
    }
}

impl Serialize for ReadTargets {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ReadTargets::All => serializer.serialize_str("all"),
            ReadTargets::Ids(ids) => ids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ReadTargets {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyword(String),
            Ids(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Keyword(keyword) if keyword == "all" => Ok(ReadTargets::All),
            Raw::Keyword(other) => Err(de::Error::custom(format!(
                "expected \"all\" or a list of ids, got \"{other}\""
            ))),
            Raw::Ids(ids) => Ok(ReadTargets::Ids(ids)),
        }
    }
}
