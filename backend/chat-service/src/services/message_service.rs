use std::sync::Arc;
use uuid::Uuid;

use chat_schema::Message;

use super::blob_janitor::BlobJanitor;
use crate::error::AppResult;
use crate::metrics::MESSAGES_APPENDED_TOTAL;
use crate::store::{DeletedMessage, MessageStore, NewMessage};

/// Message lifecycle on top of the store: sends, edits, deletes and
/// reactions, with attachment cleanup handed to the janitor.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    janitor: BlobJanitor,
}

impl MessageService {
    pub fn new(store: Arc<dyn MessageStore>, janitor: BlobJanitor) -> Self {
        Self { store, janitor }
    }

    pub async fn send(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        message: NewMessage,
    ) -> AppResult<Message> {
        let message = self
            .store
            .append_message(conversation_id, sender_id, message)
            .await?;
        MESSAGES_APPENDED_TOTAL
            .with_label_values(&[message.message_type().as_str()])
            .inc();
        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            message_type = %message.message_type(),
            "message appended"
        );
        Ok(message)
    }

    pub async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.store.mark_read(conversation_id, user_id).await
    }

    pub async fn edit(
        &self,
        message_id: Uuid,
        editor_id: Uuid,
        content: &str,
    ) -> AppResult<Message> {
        self.store.edit_message(message_id, editor_id, content).await
    }

    pub async fn delete(
        &self,
        message_id: Uuid,
        requester_id: Uuid,
        delete_for_everyone: bool,
    ) -> AppResult<DeletedMessage> {
        let deleted = self
            .store
            .delete_message(message_id, requester_id, delete_for_everyone)
            .await?;
        if let DeletedMessage::ForEveryone {
            blob: Some(public_id),
            ..
        } = &deleted
        {
            self.janitor.schedule(public_id.clone());
        }
        Ok(deleted)
    }

    pub async fn react(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> AppResult<Message> {
        self.store.toggle_reaction(message_id, user_id, emoji).await
    }

    pub async fn delete_conversation(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<()> {
        let blobs = self
            .store
            .delete_conversation(conversation_id, requester_id)
            .await?;
        tracing::info!(
            conversation_id = %conversation_id,
            attachments = blobs.len(),
            "conversation deleted"
        );
        for public_id in blobs {
            self.janitor.schedule(public_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::services::collaborators::fakes::RecordingBlobStore;
    use crate::store::MemoryMessageStore;
    use chat_schema::MessageBody;

    fn voice() -> MessageBody {
        MessageBody::Voice {
            file_url: "https://cdn.example/v.ogg".into(),
            file_public_id: "chat/v".into(),
            duration: 12,
        }
    }

    async fn setup() -> (
        MessageService,
        tokio::task::JoinHandle<()>,
        RecordingBlobStore,
        Uuid,
        Uuid,
        Uuid,
    ) {
        let store = Arc::new(MemoryMessageStore::new());
        let blobs = RecordingBlobStore::new();
        let (janitor, worker) = BlobJanitor::spawn(Arc::new(blobs.clone()));
        let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = store
            .find_or_create_conversation(student, landlord, Uuid::new_v4())
            .await
            .unwrap()
            .conversation;
        (
            MessageService::new(store, janitor),
            worker,
            blobs,
            conversation.id,
            student,
            landlord,
        )
    }

    #[tokio::test]
    async fn delete_for_everyone_schedules_attachment() {
        let (service, worker, blobs, conversation_id, student, _) = setup().await;
        let message = service
            .send(conversation_id, student, NewMessage::new(voice()))
            .await
            .unwrap();

        service.delete(message.id, student, true).await.unwrap();
        drop(service);
        worker.await.unwrap();

        assert_eq!(blobs.deleted(), vec!["chat/v"]);
    }

    #[tokio::test]
    async fn hiding_keeps_attachment() {
        let (service, worker, blobs, conversation_id, student, _) = setup().await;
        let message = service
            .send(conversation_id, student, NewMessage::new(voice()))
            .await
            .unwrap();

        let deleted = service.delete(message.id, student, false).await.unwrap();
        assert!(matches!(deleted, DeletedMessage::ForRequester { .. }));
        drop(service);
        worker.await.unwrap();

        assert!(blobs.deleted().is_empty());
    }

    #[tokio::test]
    async fn non_author_delete_schedules_nothing() {
        let (service, worker, blobs, conversation_id, student, landlord) = setup().await;
        let message = service
            .send(conversation_id, student, NewMessage::new(voice()))
            .await
            .unwrap();

        let err = service.delete(message.id, landlord, true).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        drop(service);
        worker.await.unwrap();

        assert!(blobs.deleted().is_empty());
    }

    #[tokio::test]
    async fn conversation_delete_schedules_every_attachment() {
        let (service, worker, blobs, conversation_id, student, landlord) = setup().await;
        service
            .send(conversation_id, student, NewMessage::new(voice()))
            .await
            .unwrap();
        service
            .send(conversation_id, landlord, NewMessage::new(MessageBody::text("hi")))
            .await
            .unwrap();
        service
            .send(
                conversation_id,
                landlord,
                NewMessage::new(MessageBody::Image {
                    file_url: "https://cdn.example/i.png".into(),
                    file_public_id: "chat/i".into(),
                }),
            )
            .await
            .unwrap();

        service
            .delete_conversation(conversation_id, landlord)
            .await
            .unwrap();
        drop(service);
        worker.await.unwrap();

        let mut deleted = blobs.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["chat/i", "chat/v"]);
    }
}
