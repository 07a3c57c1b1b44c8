use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ListingStatus, Message};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: Uuid, name: String },

    /// A message was persisted in a thread
    MessageCreate { message: Message },

    /// Live-scan result for the client's own compose field
    RiskBanner { thread_id: Uuid, visible: bool },

    /// A send from this connection could not be stored; the composed text is kept
    SendFailed { thread_id: Uuid, reason: String },

    /// A listing changed status (reserved, sold, back to active)
    ListingStatusChange { listing_id: Uuid, status: ListingStatus },

    /// A user came online or went offline
    PresenceUpdate { user_id: Uuid, online: bool },
}

impl GatewayEvent {
    /// Returns the thread_id if this event is scoped to a specific thread.
    /// Events that return `None` are global and go to every client.
    pub fn thread_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.thread_id),
            Self::RiskBanner { thread_id, .. } => Some(*thread_id),
            Self::SendFailed { thread_id, .. } => Some(*thread_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Receive thread-scoped events for these threads.
    Subscribe { thread_ids: Vec<Uuid> },

    /// The compose field of a thread changed; `text` is its full content.
    ComposeUpdate { thread_id: Uuid, text: String },

    /// Send whatever is currently composed for the thread.
    SendMessage { thread_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_tagged_representation() {
        let raw = r#"{"type":"ComposeUpdate","data":{"thread_id":"00000000-0000-0000-0000-000000000001","text":"hola"}}"#;
        match serde_json::from_str::<GatewayCommand>(raw).unwrap() {
            GatewayCommand::ComposeUpdate { text, .. } => assert_eq!(text, "hola"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn message_events_are_thread_scoped() {
        let thread_id = Uuid::new_v4();
        let event = GatewayEvent::MessageCreate {
            message: Message::system_warning(thread_id, "x"),
        };
        assert_eq!(event.thread_id(), Some(thread_id));

        let presence = GatewayEvent::PresenceUpdate { user_id: Uuid::new_v4(), online: true };
        assert_eq!(presence.thread_id(), None);
    }
}
