//! Message Store: durable conversations and messages.
//!
//! The store owns the unread counters and the conversation uniqueness rule.
//! Every write is authorized against the caller's identity before anything is
//! changed, and datastore failures surface as `AppError::Database` without a
//! retry.

use async_trait::async_trait;
use chat_schema::{Conversation, Message, MessageBody};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub mod memory;
pub mod postgres;

pub use memory::MemoryMessageStore;
pub use postgres::PgMessageStore;

pub const NOT_PARTICIPANT: &str = "not a participant of this conversation";
pub const NOT_AUTHOR: &str = "not the author of this message";

/// Payload of a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub body: MessageBody,
    pub reply_to: Option<Uuid>,
}

impl NewMessage {
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: Uuid) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// Outcome of find-or-create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationLookup {
    pub conversation: Conversation,
    pub created: bool,
}

/// Outcome of a message delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletedMessage {
    /// Removed for both participants. `blob` is the attachment handle to clean up.
    ForEveryone {
        message: Message,
        blob: Option<String>,
    },
    /// Hidden from the requester's history only.
    ForRequester { message: Message },
}

impl DeletedMessage {
    pub fn message(&self) -> &Message {
        match self {
            DeletedMessage::ForEveryone { message, .. }
            | DeletedMessage::ForRequester { message } => message,
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Returns the conversation for the unordered pair `{user_a, user_b}` about
    /// `property_id`, creating it when absent. Concurrent calls converge on one row.
    async fn find_or_create_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        property_id: Uuid,
    ) -> AppResult<ConversationLookup>;

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Conversation>;

    async fn conversations_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>>;

    /// History in insertion order, without messages the requester hid.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<Vec<Message>>;

    async fn get_message(&self, message_id: Uuid) -> AppResult<Message>;

    async fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        message: NewMessage,
    ) -> AppResult<Message>;

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()>;

    async fn edit_message(
        &self,
        message_id: Uuid,
        editor_id: Uuid,
        content: &str,
    ) -> AppResult<Message>;

    async fn delete_message(
        &self,
        message_id: Uuid,
        requester_id: Uuid,
        delete_for_everyone: bool,
    ) -> AppResult<DeletedMessage>;

    /// Appends `{user, emoji}`. Repeats are kept.
    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<Message>;

    /// Removes the conversation with all its messages and returns the
    /// attachment handles that were dropped with them.
    async fn delete_conversation(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<Vec<String>>;
}

/// Checks shared by both backends before a conversation is created.
pub(crate) fn validate_pair(user_a: Uuid, user_b: Uuid) -> AppResult<()> {
    if user_a == user_b {
        return Err(AppError::Validation(
            "a conversation needs two distinct participants".into(),
        ));
    }
    Ok(())
}

pub(crate) fn ensure_participant(conversation: &Conversation, user_id: Uuid) -> AppResult<()> {
    ensure_member(conversation.id, conversation.participants, user_id)
}

pub(crate) fn ensure_member(
    conversation_id: Uuid,
    participants: [Uuid; 2],
    user_id: Uuid,
) -> AppResult<()> {
    if participants.contains(&user_id) {
        Ok(())
    } else {
        tracing::warn!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            "rejected: not a participant"
        );
        Err(AppError::Forbidden(NOT_PARTICIPANT))
    }
}

pub(crate) fn ensure_author(message: &Message, user_id: Uuid) -> AppResult<()> {
    if message.sender_id == user_id {
        Ok(())
    } else {
        tracing::warn!(
            message_id = %message.id,
            user_id = %user_id,
            "rejected: not the author"
        );
        Err(AppError::Forbidden(NOT_AUTHOR))
    }
}

/// Edits apply to text messages only; the new content follows send rules.
pub(crate) fn validate_edit(message: &Message, content: &str) -> AppResult<()> {
    if !matches!(message.body, MessageBody::Text { .. }) {
        return Err(AppError::Validation(format!(
            "{} messages cannot be edited",
            message.message_type()
        )));
    }
    chat_schema::message::validate_text(content).map_err(AppError::Validation)
}
