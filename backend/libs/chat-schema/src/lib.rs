//! Shared chat schema
//!
//! Domain records and wire frames exchanged between `chat-service` and
//! `chat-client`. Both sides serialize through these types only, so a change
//! here is a protocol change.

pub mod api;
pub mod conversation;
pub mod message;
pub mod realtime;
pub mod user;

pub use conversation::{Conversation, ConversationSummary, LastMessage, UnreadCounts};
pub use message::{Message, MessageBody, MessageType, MessageView, Reaction, ReplyPreview};
pub use realtime::{ChannelEvent, ClientFrame, PresenceMember, ServerFrame};
pub use user::{ParticipantProfile, Role};
