//! Realtime channel frames.
//!
//! Frames are JSON objects tagged by `type`. Channel events nested inside
//! them are tagged by `kind` with their payload under `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{MessageView, Reaction};

/// Event carried on a conversation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ChannelEvent {
    Message(MessageView),
    Typing { user_id: Uuid, is_typing: bool },
    MessageEdited(MessageView),
    MessageDeleted { message_id: Uuid },
    ReactionAdded { message_id: Uuid, reaction: Reaction },
}

impl ChannelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::Message(_) => "message",
            ChannelEvent::Typing { .. } => "typing",
            ChannelEvent::MessageEdited(_) => "message_edited",
            ChannelEvent::MessageDeleted { .. } => "message_deleted",
            ChannelEvent::ReactionAdded { .. } => "reaction_added",
        }
    }

    /// User the event claims to come from, when it names one.
    pub fn sender(&self) -> Option<Uuid> {
        match self {
            ChannelEvent::Message(view) | ChannelEvent::MessageEdited(view) => {
                Some(view.sender_id())
            }
            ChannelEvent::Typing { user_id, .. } => Some(*user_id),
            ChannelEvent::ReactionAdded { reaction, .. } => Some(reaction.user_id),
            ChannelEvent::MessageDeleted { .. } => None,
        }
    }
}

/// One connected client in a conversation's membership table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMember {
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub entered_at: DateTime<Utc>,
}

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Publish { event: ChannelEvent },
    Typing { is_typing: bool },
    Leave,
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    PresenceSnapshot {
        members: Vec<PresenceMember>,
    },
    PresenceEnter {
        member: PresenceMember,
    },
    PresenceLeave {
        client_id: Uuid,
        user_id: Uuid,
        left_at: DateTime<Utc>,
    },
    Event {
        event: ChannelEvent,
    },
}

impl ServerFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::PresenceSnapshot { .. } => "presence_snapshot",
            ServerFrame::PresenceEnter { .. } => "presence_enter",
            ServerFrame::PresenceLeave { .. } => "presence_leave",
            ServerFrame::Event { event } => event.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typing_frame_wire_shape() {
        let frame: ClientFrame =
            serde_json::from_value(json!({"type": "typing", "is_typing": true})).unwrap();
        assert_eq!(frame, ClientFrame::Typing { is_typing: true });

        let leave: ClientFrame = serde_json::from_value(json!({"type": "leave"})).unwrap();
        assert_eq!(leave, ClientFrame::Leave);
    }

    #[test]
    fn event_frame_nests_kind_and_data() {
        let user_id = Uuid::new_v4();
        let frame = ServerFrame::Event {
            event: ChannelEvent::Typing {
                user_id,
                is_typing: false,
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["kind"], "typing");
        assert_eq!(value["event"]["data"]["is_typing"], false);
        assert_eq!(frame.kind(), "typing");

        let back: ServerFrame = serde_json::from_value(value).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn deleted_event_has_no_sender() {
        let event = ChannelEvent::MessageDeleted {
            message_id: Uuid::new_v4(),
        };
        assert_eq!(event.sender(), None);
        assert_eq!(event.kind(), "message_deleted");
    }
}
