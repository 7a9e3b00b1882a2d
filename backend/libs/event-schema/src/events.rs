use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::messages::{ReadTargets, ServerMessage};

/// Discriminators with a dedicated server frame. Everything else is a
/// notification-creation event (`like`, `comment`, `follow`, `donation`, ...).
pub const KIND_MARK_READ: &str = "mark_read";
pub const KIND_DELETE: &str = "delete";

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("invalid event payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("event has an empty userId")]
    MissingUser,

    #[error("{kind} event is missing field `{field}`")]
    MissingField { kind: String, field: &'static str },
}

/// Event published on the notification bus by an external producer
///
/// Only `userId` and `type` are interpreted; every other field is carried
/// through untouched to the client inside `{type: "notification", data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Recipient of the event
    #[serde(rename = "userId")]
    pub user_id: String,

    /// Discriminator (`like`, `comment`, `mark_read`, `delete`, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Notification id when the producer assigned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Type-specific payload
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl NotificationEvent {
    pub fn new(user_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: kind.into(),
            id: None,
            payload: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Parse a raw bus payload, rejecting events without a recipient
    pub fn from_json(raw: &str) -> Result<Self, EventError> {
        let event: Self = serde_json::from_str(raw)?;
        if event.user_id.trim().is_empty() {
            return Err(EventError::MissingUser);
        }
        Ok(event)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Convert into the frame pushed to the recipient's connections
    pub fn into_server_message(self) -> Result<ServerMessage, EventError> {
        match self.kind.as_str() {
            KIND_MARK_READ => {
                let ids = self
                    .payload
                    .get("ids")
                    .cloned()
                    .ok_or_else(|| EventError::MissingField {
                        kind: self.kind.clone(),
                        field: "ids",
                    })?;
                let ids: ReadTargets = serde_json::from_value(ids)?;
                Ok(ServerMessage::MarkRead { ids })
            }
            KIND_DELETE => {
                let id = self.id.clone().ok_or_else(|| EventError::MissingField {
                    kind: self.kind.clone(),
                    field: "id",
                })?;
                Ok(ServerMessage::Delete { id })
            }
            _ => Ok(ServerMessage::Notification { data: self }),
        }
    }
}
