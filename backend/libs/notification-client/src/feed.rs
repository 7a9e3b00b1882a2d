//! Local notification list
//!
//! Server frames are applied idempotently so that a frame delivered twice,
//! or once per open tab, leaves the list unchanged the second time.

use event_schema::{NotificationEvent, ServerMessage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type SharedFeed = Arc<RwLock<NotificationFeed>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub read: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl NotificationItem {
    /// Events without an id get a local one so they can still be removed
    pub fn from_event(event: NotificationEvent) -> Self {
        let mut payload = event.payload;
        let read = payload
            .remove("read")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Self {
            id: event.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: event.kind,
            read,
            payload,
        }
    }
}

/// Newest first
#[derive(Debug, Default, Clone)]
pub struct NotificationFeed {
    items: Vec<NotificationItem>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedFeed {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn items(&self) -> &[NotificationItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&NotificationItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|item| !item.read).count()
    }

    /// Apply a server frame. Returns whether the list changed.
    pub fn apply(&mut self, frame: &ServerMessage) -> bool {
        match frame {
            ServerMessage::Notification { data } => {
                let item = NotificationItem::from_event(data.clone());
                if self.get(&item.id).is_some() {
                    return false;
                }
                self.items.insert(0, item);
                true
            }
            ServerMessage::MarkRead { ids } => {
                let mut changed = false;
                for item in self.items.iter_mut().filter(|item| ids.contains(&item.id)) {
                    if !item.read {
                        item.read = true;
                        changed = true;
                    }
                }
                changed
            }
            ServerMessage::Delete { id } => {
                let before = self.items.len();
                self.items.retain(|item| &item.id != id);
                self.items.len() != before
            }
            ServerMessage::Connection { .. } | ServerMessage::Pong { .. } => false,
        }
    }

    /// Replace everything with a freshly fetched page
    pub fn replace_all(&mut self, items: Vec<NotificationItem>) {
        self.items = items;
    }
}
