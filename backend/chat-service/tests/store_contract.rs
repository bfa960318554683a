//! Behaviour every `MessageStore` backend must share. The PostgreSQL run is
//! ignored by default; set TEST_DATABASE_URL and pass `--ignored`.

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use chat_schema::MessageBody;
use chat_service::error::AppError;
use chat_service::store::{
    DeletedMessage, MemoryMessageStore, MessageStore, NewMessage, PgMessageStore,
};

fn text(content: &str) -> NewMessage {
    NewMessage::new(MessageBody::text(content))
}

async fn concurrent_creation_converges(store: Arc<dyn MessageStore>) {
    let (student, landlord, property) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                // Both participants race, in both argument orders.
                let (a, b) = if i % 2 == 0 {
                    (student, landlord)
                } else {
                    (landlord, student)
                };
                store.find_or_create_conversation(a, b, property).await
            })
        })
        .collect();

    let mut ids = HashSet::new();
    let mut created = 0;
    for handle in handles {
        let lookup = handle.await.unwrap().unwrap();
        ids.insert(lookup.conversation.id);
        if lookup.created {
            created += 1;
        }
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(created, 1);

    let listed = store.conversations_for_user(student).await.unwrap();
    assert_eq!(
        listed.iter().filter(|c| c.property_id == property).count(),
        1
    );

    // Same pair about another property is a different conversation.
    let other = store
        .find_or_create_conversation(student, landlord, Uuid::new_v4())
        .await
        .unwrap();
    assert!(!ids.contains(&other.conversation.id));

    assert!(matches!(
        store.find_or_create_conversation(student, student, property).await,
        Err(AppError::Validation(_))
    ));
}

async fn concurrent_appends_all_count(store: Arc<dyn MessageStore>) {
    let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = store
        .find_or_create_conversation(student, landlord, Uuid::new_v4())
        .await
        .unwrap()
        .conversation;

    let handles: Vec<_> = (0..25)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append_message(conversation.id, landlord, text(&format!("message {i}")))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let conversation = store.get_conversation(conversation.id).await.unwrap();
    assert_eq!(conversation.unread_count.get(student), 25);
    assert_eq!(conversation.unread_count.get(landlord), 0);
    assert_eq!(
        store
            .list_messages(conversation.id, student)
            .await
            .unwrap()
            .len(),
        25
    );
}

async fn read_clears_only_the_reader(store: Arc<dyn MessageStore>) {
    let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
    let id = store
        .find_or_create_conversation(student, landlord, Uuid::new_v4())
        .await
        .unwrap()
        .conversation
        .id;

    store.append_message(id, landlord, text("hi")).await.unwrap();
    store.append_message(id, student, text("hello")).await.unwrap();
    store.append_message(id, student, text("is it free?")).await.unwrap();

    store.mark_read(id, student).await.unwrap();
    store.mark_read(id, student).await.unwrap();

    let conversation = store.get_conversation(id).await.unwrap();
    assert_eq!(conversation.unread_count.get(student), 0);
    assert_eq!(conversation.unread_count.get(landlord), 2);

    assert!(matches!(
        store.mark_read(id, Uuid::new_v4()).await,
        Err(AppError::Forbidden(_))
    ));
    assert_eq!(
        store.mark_read(Uuid::new_v4(), student).await,
        Err(AppError::NotFound("conversation"))
    );
}

async fn history_is_insertion_ordered(store: Arc<dyn MessageStore>) {
    let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
    let id = store
        .find_or_create_conversation(student, landlord, Uuid::new_v4())
        .await
        .unwrap()
        .conversation
        .id;

    let mut sent = Vec::new();
    for (i, sender) in [student, landlord, student, landlord].into_iter().enumerate() {
        sent.push(
            store
                .append_message(id, sender, text(&format!("#{i}")))
                .await
                .unwrap()
                .id,
        );
    }
    let history: Vec<Uuid> = store
        .list_messages(id, landlord)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(history, sent);

    let conversation = store.get_conversation(id).await.unwrap();
    assert_eq!(conversation.last_message.unwrap().message_id, sent[3]);
}

async fn edits_are_author_and_text_only(store: Arc<dyn MessageStore>) {
    let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
    let id = store
        .find_or_create_conversation(student, landlord, Uuid::new_v4())
        .await
        .unwrap()
        .conversation
        .id;

    let note = store.append_message(id, student, text("draft")).await.unwrap();
    let gif = store
        .append_message(
            id,
            student,
            NewMessage::new(MessageBody::Gif {
                file_url: "https://cdn.example/wave.gif".into(),
                file_public_id: "".into(),
            }),
        )
        .await
        .unwrap();

    assert_eq!(
        store.edit_message(note.id, landlord, "nope").await,
        Err(AppError::Forbidden(chat_service::store::NOT_AUTHOR))
    );
    assert!(matches!(
        store.edit_message(gif.id, student, "text").await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        store.edit_message(note.id, student, "   ").await,
        Err(AppError::Validation(_))
    ));
    assert_eq!(store.get_message(note.id).await.unwrap(), note);
    assert_eq!(store.get_message(gif.id).await.unwrap(), gif);

    let edited = store.edit_message(note.id, student, "final").await.unwrap();
    assert!(edited.is_edited);
    assert_eq!(edited.body.content(), Some("final"));
    assert!(edited.updated_at >= note.updated_at);
}

async fn deletes_respect_authorship_and_recompute_preview(store: Arc<dyn MessageStore>) {
    let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
    let id = store
        .find_or_create_conversation(student, landlord, Uuid::new_v4())
        .await
        .unwrap()
        .conversation
        .id;

    let first = store.append_message(id, landlord, text("first")).await.unwrap();
    let photo = store
        .append_message(
            id,
            landlord,
            NewMessage::new(MessageBody::Image {
                file_url: "https://cdn.example/p.jpg".into(),
                file_public_id: "chat/p".into(),
            }),
        )
        .await
        .unwrap();

    assert_eq!(
        store.delete_message(photo.id, student, true).await,
        Err(AppError::Forbidden(chat_service::store::NOT_AUTHOR))
    );

    match store.delete_message(photo.id, landlord, true).await.unwrap() {
        DeletedMessage::ForEveryone { message, blob } => {
            assert_eq!(message.id, photo.id);
            assert_eq!(blob.as_deref(), Some("chat/p"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        store.get_message(photo.id).await,
        Err(AppError::NotFound("message"))
    );

    let conversation = store.get_conversation(id).await.unwrap();
    let last = conversation.last_message.unwrap();
    assert_eq!(last.message_id, first.id);
    assert_eq!(last.preview, "first");
    // Deletion leaves counters alone.
    assert_eq!(conversation.unread_count.get(student), 2);

    store.delete_message(first.id, landlord, true).await.unwrap();
    let conversation = store.get_conversation(id).await.unwrap();
    assert!(conversation.last_message.is_none());
    assert!(conversation.last_message_at.is_none());
    assert_eq!(conversation.effective_unread(student), 0);
}

async fn replies_must_stay_in_conversation(store: Arc<dyn MessageStore>) {
    let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
    let a = store
        .find_or_create_conversation(student, landlord, Uuid::new_v4())
        .await
        .unwrap()
        .conversation
        .id;
    let b = store
        .find_or_create_conversation(student, landlord, Uuid::new_v4())
        .await
        .unwrap()
        .conversation
        .id;

    let in_a = store.append_message(a, student, text("about A")).await.unwrap();
    assert!(matches!(
        store
            .append_message(b, student, text("re").replying_to(in_a.id))
            .await,
        Err(AppError::Validation(_))
    ));
    let reply = store
        .append_message(a, landlord, text("re").replying_to(in_a.id))
        .await
        .unwrap();
    assert_eq!(reply.reply_to, Some(in_a.id));
}

async fn reactions_append(store: Arc<dyn MessageStore>) {
    let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
    let id = store
        .find_or_create_conversation(student, landlord, Uuid::new_v4())
        .await
        .unwrap()
        .conversation
        .id;
    let msg = store.append_message(id, landlord, text("deal?")).await.unwrap();

    store.toggle_reaction(msg.id, student, "👍").await.unwrap();
    store.toggle_reaction(msg.id, student, "👍").await.unwrap();
    let msg = store.toggle_reaction(msg.id, student, "🎉").await.unwrap();
    let emoji: Vec<&str> = msg.reactions.iter().map(|r| r.emoji.as_str()).collect();
    assert_eq!(emoji, vec!["👍", "👍", "🎉"]);

    assert!(matches!(
        store.toggle_reaction(msg.id, Uuid::new_v4(), "👍").await,
        Err(AppError::Forbidden(_))
    ));
}

async fn conversation_delete_is_total(store: Arc<dyn MessageStore>) {
    let (student, landlord) = (Uuid::new_v4(), Uuid::new_v4());
    let property = Uuid::new_v4();
    let id = store
        .find_or_create_conversation(student, landlord, property)
        .await
        .unwrap()
        .conversation
        .id;
    let msg = store
        .append_message(
            id,
            student,
            NewMessage::new(MessageBody::File {
                file_url: "https://cdn.example/lease.pdf".into(),
                file_public_id: "chat/lease".into(),
                file_name: "lease.pdf".into(),
                file_size: 2048,
            }),
        )
        .await
        .unwrap();

    assert!(matches!(
        store.delete_conversation(id, Uuid::new_v4()).await,
        Err(AppError::Forbidden(_))
    ));

    let blobs = store.delete_conversation(id, landlord).await.unwrap();
    assert_eq!(blobs, vec!["chat/lease".to_string()]);

    assert_eq!(
        store.get_conversation(id).await,
        Err(AppError::NotFound("conversation"))
    );
    assert_eq!(
        store.list_messages(id, student).await,
        Err(AppError::NotFound("conversation"))
    );
    assert_eq!(
        store.get_message(msg.id).await,
        Err(AppError::NotFound("message"))
    );

    // The pair can start over about the same property.
    let fresh = store
        .find_or_create_conversation(student, landlord, property)
        .await
        .unwrap();
    assert!(fresh.created);
    assert_ne!(fresh.conversation.id, id);
}

async fn run_contract(store: Arc<dyn MessageStore>) {
    concurrent_creation_converges(store.clone()).await;
    concurrent_appends_all_count(store.clone()).await;
    read_clears_only_the_reader(store.clone()).await;
    history_is_insertion_ordered(store.clone()).await;
    edits_are_author_and_text_only(store.clone()).await;
    deletes_respect_authorship_and_recompute_preview(store.clone()).await;
    replies_must_stay_in_conversation(store.clone()).await;
    reactions_append(store.clone()).await;
    conversation_delete_is_total(store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_store_contract() {
    run_contract(Arc::new(MemoryMessageStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires TEST_DATABASE_URL"]
async fn postgres_store_contract() {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let pool = chat_service::db::init_pool(&url, 8).await.unwrap();
    run_contract(Arc::new(PgMessageStore::new(pool))).await;
}
