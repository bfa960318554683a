use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::message::{Message, MessageType};
use crate::user::ParticipantProfile;

/// Per-participant unread counters.
///
/// Always holds an entry for each participant. Serialized as a plain JSON
/// object of user id to count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnreadCounts(BTreeMap<Uuid, u32>);

impl UnreadCounts {
    pub fn zeroed(participants: &[Uuid]) -> Self {
        Self(participants.iter().map(|id| (*id, 0)).collect())
    }

    pub fn get(&self, user_id: Uuid) -> u32 {
        self.0.get(&user_id).copied().unwrap_or(0)
    }

    pub fn set(&mut self, user_id: Uuid, count: u32) {
        self.0.insert(user_id, count);
    }

    /// Bumps every counter except the sender's.
    pub fn increment_except(&mut self, sender_id: Uuid) {
        for (user, count) in self.0.iter_mut() {
            if *user != sender_id {
                *count = count.saturating_add(1);
            }
        }
    }

    pub fn reset(&mut self, user_id: Uuid) {
        if let Some(count) = self.0.get_mut(&user_id) {
            *count = 0;
        }
    }
}

/// Denormalized copy of the newest message, kept on the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id,
            sender_id: message.sender_id,
            message_type: message.message_type(),
            preview: message.body.preview(),
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Stored sorted; lookup is order-independent.
    pub participants: [Uuid; 2],
    pub property_id: Uuid,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: UnreadCounts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Canonical ordering of a participant pair.
    pub fn sorted_pair(a: Uuid, b: Uuid) -> [Uuid; 2] {
        if a <= b {
            [a, b]
        } else {
            [b, a]
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }

    /// Unread count that counts toward a badge. A conversation that was never
    /// messaged contributes nothing whatever its counter says.
    pub fn effective_unread(&self, user_id: Uuid) -> u32 {
        if self.last_message.is_none() {
            0
        } else {
            self.unread_count.get(user_id)
        }
    }
}

/// List row for a user's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub property_id: Uuid,
    pub property_title: String,
    pub participants: Vec<ParticipantProfile>,
    pub other_participant: ParticipantProfile,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}
