use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::user::ParticipantProfile;

/// Longest accepted text body, in characters.
pub const MAX_TEXT_CHARS: usize = 4000;
/// Longest accepted reaction, in bytes.
pub const MAX_EMOJI_BYTES: usize = 32;
/// Reply previews are cut to this many characters.
pub const REPLY_EXCERPT_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Voice,
    File,
    Gif,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Voice => "voice",
            MessageType::File => "file",
            MessageType::Gif => "gif",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "voice" => Ok(MessageType::Voice),
            "file" => Ok(MessageType::File),
            "gif" => Ok(MessageType::Gif),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// Message payload, discriminated by `message_type` on the wire.
///
/// Each variant carries exactly the fields that type populates, so a text
/// message can never hold an attachment handle and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        content: String,
    },
    Image {
        file_url: String,
        file_public_id: String,
    },
    Voice {
        file_url: String,
        file_public_id: String,
        /// Seconds
        duration: u32,
    },
    File {
        file_url: String,
        file_public_id: String,
        file_name: String,
        file_size: u64,
    },
    Gif {
        file_url: String,
        file_public_id: String,
    },
}

impl MessageBody {
    pub fn text(content: impl Into<String>) -> Self {
        MessageBody::Text {
            content: content.into(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Text { .. } => MessageType::Text,
            MessageBody::Image { .. } => MessageType::Image,
            MessageBody::Voice { .. } => MessageType::Voice,
            MessageBody::File { .. } => MessageType::File,
            MessageBody::Gif { .. } => MessageType::Gif,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            MessageBody::Text { content } => Some(content),
            _ => None,
        }
    }

    pub fn file_url(&self) -> Option<&str> {
        match self {
            MessageBody::Text { .. } => None,
            MessageBody::Image { file_url, .. }
            | MessageBody::Voice { file_url, .. }
            | MessageBody::File { file_url, .. }
            | MessageBody::Gif { file_url, .. } => Some(file_url),
        }
    }

    /// Handle needed to delete the remote blob, if this body has one.
    pub fn file_public_id(&self) -> Option<&str> {
        match self {
            MessageBody::Text { .. } => None,
            MessageBody::Image { file_public_id, .. }
            | MessageBody::Voice { file_public_id, .. }
            | MessageBody::File { file_public_id, .. }
            | MessageBody::Gif { file_public_id, .. } => {
                Some(file_public_id.as_str()).filter(|id| !id.is_empty())
            }
        }
    }

    /// Short label used for conversation lists, notifications and reply previews.
    pub fn preview(&self) -> String {
        match self {
            MessageBody::Text { content } => content.clone(),
            MessageBody::Image { .. } => "📷 Photo".to_string(),
            MessageBody::Voice { .. } => "🎤 Voice message".to_string(),
            MessageBody::File { file_name, .. } => format!("📎 {file_name}"),
            MessageBody::Gif { .. } => "GIF".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            MessageBody::Text { content } => validate_text(content),
            MessageBody::Image { file_url, .. }
            | MessageBody::Voice { file_url, .. }
            | MessageBody::Gif { file_url, .. } => require_url(file_url),
            MessageBody::File {
                file_url,
                file_name,
                ..
            } => {
                require_url(file_url)?;
                if file_name.trim().is_empty() {
                    return Err("file_name must not be empty".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Rules shared by new text messages and edits.
pub fn validate_text(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("content must not be empty".to_string());
    }
    if content.chars().count() > MAX_TEXT_CHARS {
        return Err(format!(
            "content exceeds {MAX_TEXT_CHARS} characters"
        ));
    }
    Ok(())
}

pub fn validate_emoji(emoji: &str) -> Result<(), String> {
    if emoji.trim().is_empty() {
        return Err("emoji must not be empty".to_string());
    }
    if emoji.len() > MAX_EMOJI_BYTES {
        return Err(format!("emoji exceeds {MAX_EMOJI_BYTES} bytes"));
    }
    Ok(())
}

fn require_url(file_url: &str) -> Result<(), String> {
    if file_url.trim().is_empty() {
        return Err("file_url must not be empty".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(flatten)]
    pub body: MessageBody,
    pub is_edited: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }
}

/// Resolved view of a `reply_to` target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub message_id: Uuid,
    pub sender_name: String,
    pub excerpt: String,
}

impl ReplyPreview {
    pub fn new(target: &Message, sender_name: impl Into<String>) -> Self {
        Self {
            message_id: target.id,
            sender_name: sender_name.into(),
            excerpt: excerpt(&target.body.preview(), REPLY_EXCERPT_CHARS),
        }
    }
}

/// Cuts `text` to `max_chars` characters, appending an ellipsis when shortened.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// A message as rendered: sender resolved and reply target previewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: ParticipantProfile,
    #[serde(default)]
    pub reply_preview: Option<ReplyPreview>,
}

impl MessageView {
    pub fn id(&self) -> Uuid {
        self.message.id
    }

    pub fn sender_id(&self) -> Uuid {
        self.message.sender_id
    }
}
