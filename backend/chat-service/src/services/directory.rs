//! Conversation Directory: the list-oriented read model.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chat_schema::{
    Conversation, ConversationSummary, Message, MessageView, ParticipantProfile, ReplyPreview,
};
use futures_util::future::join_all;
use uuid::Uuid;

use super::collaborators::{ProfileDirectory, PropertyDirectory};
use crate::error::{AppError, AppResult};
use crate::store::{ConversationLookup, MessageStore};

pub const UNKNOWN_PROPERTY: &str = "Unknown property";

#[derive(Clone)]
pub struct ConversationDirectory {
    store: Arc<dyn MessageStore>,
    profiles: Arc<dyn ProfileDirectory>,
    properties: Arc<dyn PropertyDirectory>,
}

impl ConversationDirectory {
    pub fn new(
        store: Arc<dyn MessageStore>,
        profiles: Arc<dyn ProfileDirectory>,
        properties: Arc<dyn PropertyDirectory>,
    ) -> Self {
        Self {
            store,
            profiles,
            properties,
        }
    }

    /// Find-or-create between a student and the landlord who owns `property_id`.
    pub async fn start_conversation(
        &self,
        student_id: Uuid,
        property_id: Uuid,
        landlord_id: Uuid,
    ) -> AppResult<ConversationLookup> {
        let property = self
            .properties
            .property(property_id)
            .await?
            .ok_or(AppError::NotFound("property"))?;

        if property.owner_id != landlord_id {
            return Err(AppError::Validation(
                "landlord_id does not own this property".into(),
            ));
        }
        if student_id == landlord_id {
            return Err(AppError::Validation(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let lookup = self
            .store
            .find_or_create_conversation(student_id, landlord_id, property_id)
            .await?;
        if lookup.created {
            tracing::info!(
                conversation_id = %lookup.conversation.id,
                property_id = %property_id,
                "conversation started"
            );
        }
        Ok(lookup)
    }

    /// Most recent activity first; never-messaged conversations trail, newest first.
    pub async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let mut conversations = self.store.conversations_for_user(user_id).await?;
        conversations.sort_by(recent_activity_first);

        let user_ids: BTreeSet<Uuid> = conversations
            .iter()
            .flat_map(|c| c.participants)
            .collect();
        let profiles = self.resolve_profiles(user_ids).await;

        let property_ids: BTreeSet<Uuid> = conversations.iter().map(|c| c.property_id).collect();
        let titles = self.resolve_titles(property_ids).await;

        Ok(conversations
            .into_iter()
            .map(|conversation| {
                let profile = |id: Uuid| {
                    profiles
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| ParticipantProfile::unknown(id))
                };
                let other = conversation
                    .other_participant(user_id)
                    .map(profile)
                    .unwrap_or_else(|| ParticipantProfile::unknown(Uuid::nil()));

                ConversationSummary {
                    id: conversation.id,
                    property_id: conversation.property_id,
                    property_title: titles
                        .get(&conversation.property_id)
                        .cloned()
                        .unwrap_or_else(|| UNKNOWN_PROPERTY.to_string()),
                    participants: conversation.participants.iter().copied().map(profile).collect(),
                    other_participant: other,
                    unread_count: conversation.unread_count.get(user_id),
                    last_message: conversation.last_message,
                    last_message_at: conversation.last_message_at,
                    created_at: conversation.created_at,
                }
            })
            .collect())
    }

    /// Sum of the user's unread counters over conversations that have a last message.
    pub async fn total_unread(&self, user_id: Uuid) -> AppResult<u64> {
        let conversations = self.store.conversations_for_user(user_id).await?;
        Ok(conversations
            .iter()
            .map(|c| u64::from(c.effective_unread(user_id)))
            .sum())
    }

    pub async fn message_history(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<Vec<MessageView>> {
        let messages = self.store.list_messages(conversation_id, requester_id).await?;
        // The listing is everything the requester may see, so a reply target
        // missing from it is hidden or gone and gets no preview.
        self.render(messages, false).await
    }

    /// Renders a single message the way history does.
    pub async fn view_message(&self, message: Message) -> AppResult<MessageView> {
        let mut views = self.render(vec![message], true).await?;
        views.pop().ok_or(AppError::Internal)
    }

    async fn render(
        &self,
        messages: Vec<Message>,
        fetch_targets: bool,
    ) -> AppResult<Vec<MessageView>> {
        let mut targets: HashMap<Uuid, Message> = messages
            .iter()
            .map(|m| (m.id, m.clone()))
            .collect();

        for reply_to in messages.iter().filter_map(|m| m.reply_to) {
            if !fetch_targets || targets.contains_key(&reply_to) {
                continue;
            }
            match self.store.get_message(reply_to).await {
                Ok(target) => {
                    targets.insert(target.id, target);
                }
                // Dangling reference: rendered without a preview.
                Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let user_ids: BTreeSet<Uuid> = messages
            .iter()
            .map(|m| m.sender_id)
            .chain(
                messages
                    .iter()
                    .filter_map(|m| m.reply_to.and_then(|id| targets.get(&id)))
                    .map(|t| t.sender_id),
            )
            .collect();
        let profiles = self.resolve_profiles(user_ids).await;
        let profile = |id: Uuid| {
            profiles
                .get(&id)
                .cloned()
                .unwrap_or_else(|| ParticipantProfile::unknown(id))
        };

        Ok(messages
            .into_iter()
            .map(|message| {
                let reply_preview = message
                    .reply_to
                    .and_then(|id| targets.get(&id))
                    .filter(|target| target.conversation_id == message.conversation_id)
                    .map(|target| ReplyPreview::new(target, profile(target.sender_id).name));
                MessageView {
                    sender: profile(message.sender_id),
                    reply_preview,
                    message,
                }
            })
            .collect())
    }

    /// One batch call. Collaborator failure degrades to unknown profiles.
    async fn resolve_profiles(
        &self,
        user_ids: BTreeSet<Uuid>,
    ) -> HashMap<Uuid, ParticipantProfile> {
        if user_ids.is_empty() {
            return HashMap::new();
        }
        let ids: Vec<Uuid> = user_ids.into_iter().collect();
        match self.profiles.profiles(&ids).await {
            Ok(profiles) => profiles.into_iter().map(|p| (p.id, p)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, count = ids.len(), "profile lookup failed");
                HashMap::new()
            }
        }
    }

    async fn resolve_titles(&self, property_ids: BTreeSet<Uuid>) -> HashMap<Uuid, String> {
        let lookups = property_ids.into_iter().map(|id| async move {
            match self.properties.property(id).await {
                Ok(Some(property)) => Some((id, property.title)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(property_id = %id, error = %e, "property lookup failed");
                    None
                }
            }
        });
        join_all(lookups).await.into_iter().flatten().collect()
    }
}

fn recent_activity_first(a: &Conversation, b: &Conversation) -> Ordering {
    match (a.last_message_at, b.last_message_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.created_at.cmp(&a.created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::collaborators::fakes::{InMemoryProfiles, InMemoryProperties};
    use crate::store::{MemoryMessageStore, NewMessage};
    use chat_schema::MessageBody;

    struct Fixture {
        store: Arc<MemoryMessageStore>,
        profiles: InMemoryProfiles,
        properties: InMemoryProperties,
        directory: ConversationDirectory,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryMessageStore::new());
        let profiles = InMemoryProfiles::new();
        let properties = InMemoryProperties::new();
        let directory = ConversationDirectory::new(
            store.clone(),
            Arc::new(profiles.clone()),
            Arc::new(properties.clone()),
        );
        Fixture {
            store,
            profiles,
            properties,
            directory,
        }
    }

    #[tokio::test]
    async fn start_requires_existing_property_owned_by_landlord() {
        let f = fixture();
        let (student, landlord, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let property = Uuid::new_v4();

        let err = f
            .directory
            .start_conversation(student, property, landlord)
            .await
            .unwrap_err();
        assert_eq!(err, AppError::NotFound("property"));

        f.properties.insert(property, "Room near campus", landlord);
        let err = f
            .directory
            .start_conversation(student, property, stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let first = f
            .directory
            .start_conversation(student, property, landlord)
            .await
            .unwrap();
        let again = f
            .directory
            .start_conversation(student, property, landlord)
            .await
            .unwrap();
        assert!(first.created);
        assert!(!again.created);
        assert_eq!(first.conversation.id, again.conversation.id);
    }

    #[tokio::test]
    async fn list_orders_by_activity_and_resolves_profiles_in_one_batch() {
        let f = fixture();
        let student = Uuid::new_v4();
        let (landlord_a, landlord_b, landlord_c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        f.profiles.insert(student, "Sam");
        f.profiles.insert(landlord_a, "Alice");
        f.profiles.insert(landlord_b, "Bob");
        let (p1, p2, p3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        f.properties.insert(p1, "Studio A", landlord_a);
        f.properties.insert(p2, "Loft B", landlord_b);

        let a = f
            .store
            .find_or_create_conversation(student, landlord_a, p1)
            .await
            .unwrap()
            .conversation;
        let b = f
            .store
            .find_or_create_conversation(student, landlord_b, p2)
            .await
            .unwrap()
            .conversation;
        let c = f
            .store
            .find_or_create_conversation(student, landlord_c, p3)
            .await
            .unwrap()
            .conversation;

        f.store
            .append_message(a.id, landlord_a, NewMessage::new(MessageBody::text("first")))
            .await
            .unwrap();
        f.store
            .append_message(b.id, landlord_b, NewMessage::new(MessageBody::text("second")))
            .await
            .unwrap();

        let list = f.directory.list_conversations(student).await.unwrap();
        let order: Vec<Uuid> = list.iter().map(|s| s.id).collect();
        assert_eq!(order, vec![b.id, a.id, c.id]);
        assert_eq!(f.profiles.batch_calls(), 1);

        assert_eq!(list[0].other_participant.name, "Bob");
        assert_eq!(list[0].property_title, "Loft B");
        assert_eq!(list[0].unread_count, 1);
        assert_eq!(list[2].other_participant.name, ParticipantProfile::UNKNOWN_NAME);
        assert_eq!(list[2].property_title, UNKNOWN_PROPERTY);
        assert!(list[2].last_message.is_none());
    }

    #[tokio::test]
    async fn collaborator_outage_degrades_list() {
        let f = fixture();
        let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
        let property = Uuid::new_v4();
        f.store
            .find_or_create_conversation(student, landlord, property)
            .await
            .unwrap();
        f.profiles.set_failing(true);
        f.properties.set_failing(true);

        let list = f.directory.list_conversations(student).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].property_title, UNKNOWN_PROPERTY);
        assert_eq!(list[0].other_participant.id, landlord);
        assert_eq!(list[0].other_participant.name, ParticipantProfile::UNKNOWN_NAME);
    }

    #[tokio::test]
    async fn total_unread_ignores_never_messaged_conversations() {
        let f = fixture();
        let student = Uuid::new_v4();
        let (l1, l2) = (Uuid::new_v4(), Uuid::new_v4());
        let a = f
            .store
            .find_or_create_conversation(student, l1, Uuid::new_v4())
            .await
            .unwrap()
            .conversation;
        f.store
            .find_or_create_conversation(student, l2, Uuid::new_v4())
            .await
            .unwrap();

        for text in ["one", "two"] {
            f.store
                .append_message(a.id, l1, NewMessage::new(MessageBody::text(text)))
                .await
                .unwrap();
        }

        assert_eq!(f.directory.total_unread(student).await.unwrap(), 2);
        assert_eq!(f.directory.total_unread(l1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_attaches_reply_previews() {
        let f = fixture();
        let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
        f.profiles.insert(landlord, "Alice");
        let conv = f
            .store
            .find_or_create_conversation(student, landlord, Uuid::new_v4())
            .await
            .unwrap()
            .conversation;

        let long = "x".repeat(100);
        let original = f
            .store
            .append_message(conv.id, landlord, NewMessage::new(MessageBody::text(long)))
            .await
            .unwrap();
        let reply = f
            .store
            .append_message(
                conv.id,
                student,
                NewMessage::new(MessageBody::text("sure")).replying_to(original.id),
            )
            .await
            .unwrap();
        f.store.delete_message(original.id, landlord, true).await.unwrap();

        let history = f.directory.message_history(conv.id, student).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id(), reply.id);
        // Target is gone, so no preview.
        assert!(history[0].reply_preview.is_none());

        let body = MessageBody::text("y".repeat(90));
        let second = f
            .store
            .append_message(conv.id, landlord, NewMessage::new(body))
            .await
            .unwrap();
        let view = f
            .directory
            .view_message(
                f.store
                    .append_message(
                        conv.id,
                        student,
                        NewMessage::new(MessageBody::text("ok")).replying_to(second.id),
                    )
                    .await
                    .unwrap(),
            )
            .await
            .unwrap();
        let preview = view.reply_preview.unwrap();
        assert_eq!(preview.sender_name, "Alice");
        assert_eq!(preview.excerpt.chars().count(), 81);
        assert!(preview.excerpt.ends_with('…'));
    }

    #[tokio::test]
    async fn history_hides_previews_of_messages_the_requester_hid() {
        let f = fixture();
        let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
        f.profiles.insert(student, "Sam");
        let conv = f
            .store
            .find_or_create_conversation(student, landlord, Uuid::new_v4())
            .await
            .unwrap()
            .conversation;
        let original = f
            .store
            .append_message(conv.id, student, NewMessage::new(MessageBody::text("typo")))
            .await
            .unwrap();
        f.store
            .append_message(
                conv.id,
                landlord,
                NewMessage::new(MessageBody::text("what?")).replying_to(original.id),
            )
            .await
            .unwrap();
        f.store.delete_message(original.id, student, false).await.unwrap();

        let mine = f.directory.message_history(conv.id, student).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert!(mine[0].reply_preview.is_none());

        let theirs = f.directory.message_history(conv.id, landlord).await.unwrap();
        assert_eq!(theirs.len(), 2);
        let preview = theirs[1].reply_preview.as_ref().unwrap();
        assert_eq!(preview.message_id, original.id);
        assert_eq!(preview.sender_name, "Sam");
    }
}
