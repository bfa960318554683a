use async_trait::async_trait;
use chat_schema::{Conversation, LastMessage, Message, MessageBody, Reaction, UnreadCounts};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ensure_author, ensure_participant, validate_edit, validate_pair, ConversationLookup,
    DeletedMessage, MessageStore, NewMessage,
};
use crate::error::{AppError, AppResult};

struct StoredMessage {
    message: Message,
    hidden_for: HashSet<Uuid>,
}

#[derive(Default)]
struct Tables {
    conversations: HashMap<Uuid, Conversation>,
    by_key: HashMap<([Uuid; 2], Uuid), Uuid>,
    /// conversation_id -> messages in insertion order
    messages: HashMap<Uuid, Vec<StoredMessage>>,
    /// message_id -> conversation_id
    message_index: HashMap<Uuid, Uuid>,
}

impl Tables {
    fn conversation(&self, id: Uuid) -> AppResult<&Conversation> {
        self.conversations
            .get(&id)
            .ok_or(AppError::NotFound("conversation"))
    }

    fn locate(&self, message_id: Uuid) -> AppResult<(Uuid, usize)> {
        let conversation_id = *self
            .message_index
            .get(&message_id)
            .ok_or(AppError::NotFound("message"))?;
        let position = self
            .messages
            .get(&conversation_id)
            .and_then(|list| list.iter().position(|m| m.message.id == message_id))
            .ok_or(AppError::NotFound("message"))?;
        Ok((conversation_id, position))
    }

    fn stored_mut(&mut self, message_id: Uuid) -> AppResult<&mut StoredMessage> {
        let (conversation_id, position) = self.locate(message_id)?;
        self.messages
            .get_mut(&conversation_id)
            .and_then(|list| list.get_mut(position))
            .ok_or(AppError::NotFound("message"))
    }

    fn refresh_last_message(&mut self, conversation_id: Uuid) {
        let newest = self
            .messages
            .get(&conversation_id)
            .and_then(|list| list.last())
            .map(|stored| LastMessage::from(&stored.message));
        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            conversation.last_message_at = newest.as_ref().map(|m| m.created_at);
            conversation.last_message = newest;
            conversation.updated_at = Utc::now();
        }
    }
}

/// Process-local store. One lock over every table makes each operation
/// linearizable.
#[derive(Default)]
pub struct MemoryMessageStore {
    tables: Mutex<Tables>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn find_or_create_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        property_id: Uuid,
    ) -> AppResult<ConversationLookup> {
        validate_pair(user_a, user_b)?;
        let participants = Conversation::sorted_pair(user_a, user_b);
        let mut tables = self.tables.lock().await;

        if let Some(id) = tables.by_key.get(&(participants, property_id)).copied() {
            let conversation = tables.conversation(id)?.clone();
            return Ok(ConversationLookup {
                conversation,
                created: false,
            });
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participants,
            property_id,
            last_message: None,
            last_message_at: None,
            unread_count: UnreadCounts::zeroed(&participants),
            created_at: now,
            updated_at: now,
        };
        tables
            .by_key
            .insert((participants, property_id), conversation.id);
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        tables.messages.insert(conversation.id, Vec::new());

        tracing::debug!(conversation_id = %conversation.id, "conversation created");
        Ok(ConversationLookup {
            conversation,
            created: true,
        })
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        let tables = self.tables.lock().await;
        tables.conversation(conversation_id).cloned()
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<Vec<Message>> {
        let tables = self.tables.lock().await;
        ensure_participant(tables.conversation(conversation_id)?, requester_id)?;

        Ok(tables
            .messages
            .get(&conversation_id)
            .map(|list| {
                list.iter()
                    .filter(|stored| !stored.hidden_for.contains(&requester_id))
                    .map(|stored| stored.message.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_message(&self, message_id: Uuid) -> AppResult<Message> {
        let tables = self.tables.lock().await;
        let (conversation_id, position) = tables.locate(message_id)?;
        tables
            .messages
            .get(&conversation_id)
            .and_then(|list| list.get(position))
            .map(|stored| stored.message.clone())
            .ok_or(AppError::NotFound("message"))
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        message: NewMessage,
    ) -> AppResult<Message> {
        let mut tables = self.tables.lock().await;
        ensure_participant(tables.conversation(conversation_id)?, sender_id)?;
        message.body.validate().map_err(AppError::Validation)?;

        if let Some(reply_to) = message.reply_to {
            if tables.message_index.get(&reply_to) != Some(&conversation_id) {
                return Err(AppError::Validation(
                    "reply_to must reference a message in this conversation".into(),
                ));
            }
        }

        let now = Utc::now();
        let record = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            body: message.body,
            is_edited: false,
            reactions: Vec::new(),
            reply_to: message.reply_to,
            created_at: now,
            updated_at: now,
        };

        tables.message_index.insert(record.id, conversation_id);
        tables
            .messages
            .entry(conversation_id)
            .or_default()
            .push(StoredMessage {
                message: record.clone(),
                hidden_for: HashSet::new(),
            });

        if let Some(conversation) = tables.conversations.get_mut(&conversation_id) {
            conversation.last_message = Some(LastMessage::from(&record));
            conversation.last_message_at = Some(record.created_at);
            conversation.updated_at = now;
            conversation.unread_count.increment_except(sender_id);
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %record.id,
            "message appended"
        );
        Ok(record)
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        ensure_participant(tables.conversation(conversation_id)?, user_id)?;
        if let Some(conversation) = tables.conversations.get_mut(&conversation_id) {
            conversation.unread_count.reset(user_id);
        }
        Ok(())
    }

    async fn edit_message(
        &self,
        message_id: Uuid,
        editor_id: Uuid,
        content: &str,
    ) -> AppResult<Message> {
        let mut tables = self.tables.lock().await;
        let (conversation_id, _) = tables.locate(message_id)?;
        let stored = tables.stored_mut(message_id)?;
        ensure_author(&stored.message, editor_id)?;
        validate_edit(&stored.message, content)?;

        stored.message.body = MessageBody::text(content);
        stored.message.is_edited = true;
        stored.message.updated_at = Utc::now();
        let edited = stored.message.clone();

        let is_newest = tables
            .messages
            .get(&conversation_id)
            .and_then(|list| list.last())
            .map(|last| last.message.id == message_id)
            .unwrap_or(false);
        if is_newest {
            if let Some(conversation) = tables.conversations.get_mut(&conversation_id) {
                conversation.last_message = Some(LastMessage::from(&edited));
            }
        }

        tracing::debug!(message_id = %message_id, "message edited");
        Ok(edited)
    }

    async fn delete_message(
        &self,
        message_id: Uuid,
        requester_id: Uuid,
        delete_for_everyone: bool,
    ) -> AppResult<DeletedMessage> {
        let mut tables = self.tables.lock().await;
        let (conversation_id, position) = tables.locate(message_id)?;
        let stored = tables.stored_mut(message_id)?;
        ensure_author(&stored.message, requester_id)?;

        if !delete_for_everyone {
            stored.hidden_for.insert(requester_id);
            return Ok(DeletedMessage::ForRequester {
                message: stored.message.clone(),
            });
        }

        let removed = match tables.messages.get_mut(&conversation_id) {
            Some(list) => list.remove(position).message,
            None => return Err(AppError::NotFound("message")),
        };
        tables.message_index.remove(&message_id);
        tables.refresh_last_message(conversation_id);

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            "message deleted for everyone"
        );
        let blob = removed.body.file_public_id().map(str::to_string);
        Ok(DeletedMessage::ForEveryone {
            message: removed,
            blob,
        })
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<Message> {
        chat_schema::message::validate_emoji(emoji).map_err(AppError::Validation)?;
        let mut tables = self.tables.lock().await;
        let (conversation_id, _) = tables.locate(message_id)?;
        ensure_participant(tables.conversation(conversation_id)?, user_id)?;

        let stored = tables.stored_mut(message_id)?;
        stored.message.reactions.push(Reaction {
            user_id,
            emoji: emoji.to_string(),
        });
        Ok(stored.message.clone())
    }

    async fn delete_conversation(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<Vec<String>> {
        let mut tables = self.tables.lock().await;
        let conversation = tables.conversation(conversation_id)?;
        ensure_participant(conversation, requester_id)?;
        let key = (conversation.participants, conversation.property_id);

        let removed = tables.messages.remove(&conversation_id).unwrap_or_default();
        let mut blobs = Vec::new();
        for stored in removed {
            tables.message_index.remove(&stored.message.id);
            if let Some(id) = stored.message.body.file_public_id() {
                blobs.push(id.to_string());
            }
        }
        tables.by_key.remove(&key);
        tables.conversations.remove(&conversation_id);

        tracing::debug!(conversation_id = %conversation_id, "conversation deleted");
        Ok(blobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hidden_message_disappears_only_for_requester() {
        let store = MemoryMessageStore::new();
        let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = store
            .find_or_create_conversation(student, landlord, Uuid::new_v4())
            .await
            .unwrap()
            .conversation;
        let msg = store
            .append_message(conv.id, student, NewMessage::new(MessageBody::text("hi")))
            .await
            .unwrap();

        let outcome = store.delete_message(msg.id, student, false).await.unwrap();
        assert!(matches!(outcome, DeletedMessage::ForRequester { .. }));

        assert!(store.list_messages(conv.id, student).await.unwrap().is_empty());
        assert_eq!(store.list_messages(conv.id, landlord).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn editing_newest_message_updates_preview() {
        let store = MemoryMessageStore::new();
        let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = store
            .find_or_create_conversation(student, landlord, Uuid::new_v4())
            .await
            .unwrap()
            .conversation;
        let msg = store
            .append_message(conv.id, landlord, NewMessage::new(MessageBody::text("draft")))
            .await
            .unwrap();

        store.edit_message(msg.id, landlord, "final").await.unwrap();
        let conv = store.get_conversation(conv.id).await.unwrap();
        assert_eq!(conv.last_message.unwrap().preview, "final");
    }
}
