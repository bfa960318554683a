use async_trait::async_trait;
use chat_schema::{
    Conversation, LastMessage, Message, MessageBody, MessageType, Reaction, UnreadCounts,
};
use chrono::{DateTime, SubsecRound, Utc};
use deadpool_postgres::Pool;
use std::collections::HashMap;
use tokio_postgres::types::Json;
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use super::{
    ensure_author, ensure_member, ensure_participant, validate_edit, validate_pair,
    ConversationLookup, DeletedMessage, MessageStore, NewMessage,
};
use crate::error::{AppError, AppResult};

/// Postgres keeps microseconds; records returned to callers must match what a re-read yields.
fn db_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

const CONVERSATION_SELECT: &str = r#"
    SELECT
        c.id,
        c.participant_low,
        c.participant_high,
        c.property_id,
        c.last_message,
        c.last_message_at,
        c.created_at,
        c.updated_at,
        COALESCE(
            (SELECT json_object_agg(u.user_id::text, u.unread_count)
               FROM conversation_unread u
              WHERE u.conversation_id = c.id),
            '{}'::json
        ) AS unread
    FROM conversations c
"#;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, message_type, content, file_url, \
     file_public_id, file_name, file_size, duration, is_edited, reply_to, created_at, updated_at";

/// PostgreSQL-backed store.
///
/// Writes that touch a conversation's counters or preview lock the
/// conversation row first, so appends, deletes and edits on one conversation
/// serialize while different conversations proceed in parallel.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: Pool,
}

impl PgMessageStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn conversation_from_row(row: &Row) -> AppResult<Conversation> {
    let unread: serde_json::Value = row.try_get("unread")?;
    let unread_count: UnreadCounts = serde_json::from_value(unread)
        .map_err(|e| AppError::Database(format!("unread counters: {e}")))?;
    let last_message: Option<Json<LastMessage>> = row.try_get("last_message")?;

    Ok(Conversation {
        id: row.try_get("id")?,
        participants: [
            row.try_get("participant_low")?,
            row.try_get("participant_high")?,
        ],
        property_id: row.try_get("property_id")?,
        last_message: last_message.map(|json| json.0),
        last_message_at: row.try_get("last_message_at")?,
        unread_count,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &Row) -> AppResult<Message> {
    let message_type: String = row.try_get("message_type")?;
    let message_type: MessageType = message_type.parse().map_err(AppError::Database)?;

    let content: Option<String> = row.try_get("content")?;
    let file_url: Option<String> = row.try_get("file_url")?;
    let file_public_id: Option<String> = row.try_get("file_public_id")?;
    let file_url = file_url.unwrap_or_default();
    let file_public_id = file_public_id.unwrap_or_default();

    let body = match message_type {
        MessageType::Text => MessageBody::Text {
            content: content.unwrap_or_default(),
        },
        MessageType::Image => MessageBody::Image {
            file_url,
            file_public_id,
        },
        MessageType::Voice => {
            let duration: Option<i32> = row.try_get("duration")?;
            MessageBody::Voice {
                file_url,
                file_public_id,
                duration: duration.and_then(|d| u32::try_from(d).ok()).unwrap_or(0),
            }
        }
        MessageType::File => {
            let file_name: Option<String> = row.try_get("file_name")?;
            let file_size: Option<i64> = row.try_get("file_size")?;
            MessageBody::File {
                file_url,
                file_public_id,
                file_name: file_name.unwrap_or_default(),
                file_size: file_size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
            }
        }
        MessageType::Gif => MessageBody::Gif {
            file_url,
            file_public_id,
        },
    };

    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        body,
        is_edited: row.try_get("is_edited")?,
        reactions: Vec::new(),
        reply_to: row.try_get("reply_to")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Column values for a body, in `MESSAGE_COLUMNS` order from `content` to `duration`.
struct BodyColumns<'a> {
    content: Option<&'a str>,
    file_url: Option<&'a str>,
    file_public_id: Option<&'a str>,
    file_name: Option<&'a str>,
    file_size: Option<i64>,
    duration: Option<i32>,
}

impl<'a> BodyColumns<'a> {
    fn from_body(body: &'a MessageBody) -> AppResult<Self> {
        let mut columns = BodyColumns {
            content: body.content(),
            file_url: body.file_url(),
            file_public_id: body.file_public_id(),
            file_name: None,
            file_size: None,
            duration: None,
        };
        match body {
            MessageBody::File {
                file_name,
                file_size,
                ..
            } => {
                columns.file_name = Some(file_name);
                columns.file_size = Some(
                    i64::try_from(*file_size)
                        .map_err(|_| AppError::Validation("file_size too large".into()))?,
                );
            }
            MessageBody::Voice { duration, .. } => {
                columns.duration = Some(
                    i32::try_from(*duration)
                        .map_err(|_| AppError::Validation("duration too large".into()))?,
                );
            }
            _ => {}
        }
        Ok(columns)
    }
}

async fn attach_reactions<C>(client: &C, messages: &mut [Message]) -> AppResult<()>
where
    C: GenericClient + Sync,
{
    if messages.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
    let rows = client
        .query(
            "SELECT message_id, user_id, emoji FROM message_reactions \
             WHERE message_id = ANY($1) ORDER BY id",
            &[&ids],
        )
        .await?;

    let mut by_message: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
    for row in rows {
        let message_id: Uuid = row.try_get("message_id")?;
        by_message.entry(message_id).or_default().push(Reaction {
            user_id: row.try_get("user_id")?,
            emoji: row.try_get("emoji")?,
        });
    }
    for message in messages.iter_mut() {
        if let Some(reactions) = by_message.remove(&message.id) {
            message.reactions = reactions;
        }
    }
    Ok(())
}

async fn load_message<C>(client: &C, message_id: Uuid, for_update: bool) -> AppResult<Message>
where
    C: GenericClient + Sync,
{
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1{lock}");
    let row = client
        .query_opt(sql.as_str(), &[&message_id])
        .await?
        .ok_or(AppError::NotFound("message"))?;
    let mut message = [message_from_row(&row)?];
    attach_reactions(client, &mut message).await?;
    let [message] = message;
    Ok(message)
}

/// Locks the conversation row and returns its participants.
async fn lock_conversation<C>(client: &C, conversation_id: Uuid) -> AppResult<[Uuid; 2]>
where
    C: GenericClient + Sync,
{
    let row = client
        .query_opt(
            "SELECT participant_low, participant_high FROM conversations WHERE id = $1 FOR UPDATE",
            &[&conversation_id],
        )
        .await?
        .ok_or(AppError::NotFound("conversation"))?;
    Ok([
        row.try_get("participant_low")?,
        row.try_get("participant_high")?,
    ])
}

async fn message_conversation<C>(client: &C, message_id: Uuid) -> AppResult<Uuid>
where
    C: GenericClient + Sync,
{
    let row = client
        .query_opt(
            "SELECT conversation_id FROM messages WHERE id = $1",
            &[&message_id],
        )
        .await?
        .ok_or(AppError::NotFound("message"))?;
    Ok(row.try_get("conversation_id")?)
}

/// Points the conversation preview at its newest message, or clears it.
async fn refresh_last_message<C>(client: &C, conversation_id: Uuid) -> AppResult<()>
where
    C: GenericClient + Sync,
{
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages \
         WHERE conversation_id = $1 ORDER BY seq DESC LIMIT 1"
    );
    let newest = client
        .query_opt(sql.as_str(), &[&conversation_id])
        .await?
        .map(|row| message_from_row(&row))
        .transpose()?;

    let last = newest.as_ref().map(LastMessage::from);
    let last_at: Option<DateTime<Utc>> = last.as_ref().map(|m| m.created_at);
    client
        .execute(
            "UPDATE conversations SET last_message = $2, last_message_at = $3, updated_at = NOW() \
             WHERE id = $1",
            &[&conversation_id, &last.as_ref().map(Json), &last_at],
        )
        .await?;
    Ok(())
}

async fn load_conversation<C>(client: &C, conversation_id: Uuid) -> AppResult<Conversation>
where
    C: GenericClient + Sync,
{
    let sql = format!("{CONVERSATION_SELECT} WHERE c.id = $1");
    let row = client
        .query_opt(sql.as_str(), &[&conversation_id])
        .await?
        .ok_or(AppError::NotFound("conversation"))?;
    conversation_from_row(&row)
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn find_or_create_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        property_id: Uuid,
    ) -> AppResult<ConversationLookup> {
        validate_pair(user_a, user_b)?;
        let [low, high] = Conversation::sorted_pair(user_a, user_b);

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // A concurrent insert of the same key blocks here until it commits,
        // then falls through to the lookup below.
        let inserted = tx
            .query_opt(
                "INSERT INTO conversations (id, participant_low, participant_high, property_id) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (participant_low, participant_high, property_id) DO NOTHING \
                 RETURNING id",
                &[&Uuid::new_v4(), &low, &high, &property_id],
            )
            .await?;

        let (id, created) = match inserted {
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                tx.execute(
                    "INSERT INTO conversation_unread (conversation_id, user_id) \
                     VALUES ($1, $2), ($1, $3)",
                    &[&id, &low, &high],
                )
                .await?;
                (id, true)
            }
            None => {
                let row = tx
                    .query_one(
                        "SELECT id FROM conversations \
                         WHERE participant_low = $1 AND participant_high = $2 AND property_id = $3",
                        &[&low, &high, &property_id],
                    )
                    .await?;
                (row.try_get("id")?, false)
            }
        };

        let conversation = load_conversation(&*tx, id).await?;
        tx.commit().await?;

        if created {
            tracing::debug!(conversation_id = %id, "conversation created");
        }
        Ok(ConversationLookup {
            conversation,
            created,
        })
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        let client = self.pool.get().await?;
        load_conversation(&**client, conversation_id).await
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "{CONVERSATION_SELECT} WHERE c.participant_low = $1 OR c.participant_high = $1"
        );
        let rows = client.query(sql.as_str(), &[&user_id]).await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let conversation = load_conversation(&**client, conversation_id).await?;
        ensure_participant(&conversation, requester_id)?;

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = $1 AND NOT ($2 = ANY(hidden_for)) \
             ORDER BY seq"
        );
        let rows = client
            .query(sql.as_str(), &[&conversation_id, &requester_id])
            .await?;
        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        attach_reactions(&**client, &mut messages).await?;
        Ok(messages)
    }

    async fn get_message(&self, message_id: Uuid) -> AppResult<Message> {
        let client = self.pool.get().await?;
        load_message(&**client, message_id, false).await
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        message: NewMessage,
    ) -> AppResult<Message> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let participants = lock_conversation(&*tx, conversation_id).await?;
        ensure_member(conversation_id, participants, sender_id)?;
        message.body.validate().map_err(AppError::Validation)?;

        if let Some(reply_to) = message.reply_to {
            let found = tx
                .query_opt(
                    "SELECT 1 FROM messages WHERE id = $1 AND conversation_id = $2",
                    &[&reply_to, &conversation_id],
                )
                .await?;
            if found.is_none() {
                return Err(AppError::Validation(
                    "reply_to must reference a message in this conversation".into(),
                ));
            }
        }

        let now = db_now();
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
        let columns = BodyColumns::from_body(&record.body)?;
        let message_type = record.message_type().as_str();

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, message_type, content, \
             file_url, file_public_id, file_name, file_size, duration, reply_to, created_at, \
             updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)",
            &[
                &record.id,
                &conversation_id,
                &sender_id,
                &message_type,
                &columns.content,
                &columns.file_url,
                &columns.file_public_id,
                &columns.file_name,
                &columns.file_size,
                &columns.duration,
                &record.reply_to,
                &now,
            ],
        )
        .await?;

        let last = LastMessage::from(&record);
        tx.execute(
            "UPDATE conversations SET last_message = $2, last_message_at = $3, updated_at = $3 \
             WHERE id = $1",
            &[&conversation_id, &Json(&last), &now],
        )
        .await?;

        // Row-level increments: concurrent appends both land.
        tx.execute(
            "UPDATE conversation_unread SET unread_count = unread_count + 1 \
             WHERE conversation_id = $1 AND user_id <> $2",
            &[&conversation_id, &sender_id],
        )
        .await?;

        tx.commit().await?;

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %record.id,
            "message appended"
        );
        Ok(record)
    }

    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT participant_low, participant_high FROM conversations WHERE id = $1",
                &[&conversation_id],
            )
            .await?
            .ok_or(AppError::NotFound("conversation"))?;
        ensure_member(
            conversation_id,
            [
                row.try_get("participant_low")?,
                row.try_get("participant_high")?,
            ],
            user_id,
        )?;

        client
            .execute(
                "UPDATE conversation_unread SET unread_count = 0 \
                 WHERE conversation_id = $1 AND user_id = $2",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(())
    }

    async fn edit_message(
        &self,
        message_id: Uuid,
        editor_id: Uuid,
        content: &str,
    ) -> AppResult<Message> {
        let mut client = self.pool.get().await?;
        let conversation_id = message_conversation(&**client, message_id).await?;

        let tx = client.transaction().await?;
        lock_conversation(&*tx, conversation_id).await?;
        let mut message = load_message(&*tx, message_id, true).await?;
        ensure_author(&message, editor_id)?;
        validate_edit(&message, content)?;

        let now = db_now();
        tx.execute(
            "UPDATE messages SET content = $2, is_edited = TRUE, updated_at = $3 WHERE id = $1",
            &[&message_id, &content, &now],
        )
        .await?;
        message.body = MessageBody::text(content);
        message.is_edited = true;
        message.updated_at = now;

        let newest = tx
            .query_opt(
                "SELECT id FROM messages WHERE conversation_id = $1 ORDER BY seq DESC LIMIT 1",
                &[&conversation_id],
            )
            .await?;
        if let Some(row) = newest {
            let newest_id: Uuid = row.try_get("id")?;
            if newest_id == message_id {
                tx.execute(
                    "UPDATE conversations SET last_message = $2 WHERE id = $1",
                    &[&conversation_id, &Json(&LastMessage::from(&message))],
                )
                .await?;
            }
        }

        tx.commit().await?;
        tracing::debug!(message_id = %message_id, "message edited");
        Ok(message)
    }

    async fn delete_message(
        &self,
        message_id: Uuid,
        requester_id: Uuid,
        delete_for_everyone: bool,
    ) -> AppResult<DeletedMessage> {
        let mut client = self.pool.get().await?;
        let conversation_id = message_conversation(&**client, message_id).await?;

        let tx = client.transaction().await?;
        lock_conversation(&*tx, conversation_id).await?;
        let message = load_message(&*tx, message_id, true).await?;
        ensure_author(&message, requester_id)?;

        if !delete_for_everyone {
            tx.execute(
                "UPDATE messages SET hidden_for = array_append(hidden_for, $2) \
                 WHERE id = $1 AND NOT ($2 = ANY(hidden_for))",
                &[&message_id, &requester_id],
            )
            .await?;
            tx.commit().await?;
            return Ok(DeletedMessage::ForRequester { message });
        }

        tx.execute("DELETE FROM messages WHERE id = $1", &[&message_id])
            .await?;
        refresh_last_message(&*tx, conversation_id).await?;
        tx.commit().await?;

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            "message deleted for everyone"
        );
        let blob = message.body.file_public_id().map(str::to_string);
        Ok(DeletedMessage::ForEveryone { message, blob })
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<Message> {
        chat_schema::message::validate_emoji(emoji).map_err(AppError::Validation)?;
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT m.conversation_id, c.participant_low, c.participant_high \
                 FROM messages m JOIN conversations c ON c.id = m.conversation_id \
                 WHERE m.id = $1",
                &[&message_id],
            )
            .await?
            .ok_or(AppError::NotFound("message"))?;
        ensure_member(
            row.try_get("conversation_id")?,
            [
                row.try_get("participant_low")?,
                row.try_get("participant_high")?,
            ],
            user_id,
        )?;

        client
            .execute(
                "INSERT INTO message_reactions (message_id, user_id, emoji) VALUES ($1, $2, $3)",
                &[&message_id, &user_id, &emoji],
            )
            .await?;

        load_message(&**client, message_id, false).await
    }

    async fn delete_conversation(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<Vec<String>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let participants = lock_conversation(&*tx, conversation_id).await?;
        ensure_member(conversation_id, participants, requester_id)?;

        let rows = tx
            .query(
                "SELECT file_public_id FROM messages \
                 WHERE conversation_id = $1 AND file_public_id IS NOT NULL ORDER BY seq",
                &[&conversation_id],
            )
            .await?;
        let blobs = rows
            .iter()
            .map(|row| row.try_get::<_, String>("file_public_id"))
            .collect::<Result<Vec<_>, _>>()?;

        // Unread rows, messages and reactions go with it through cascades.
        tx.execute("DELETE FROM conversations WHERE id = $1", &[&conversation_id])
            .await?;
        tx.commit().await?;

        tracing::debug!(conversation_id = %conversation_id, "conversation deleted");
        Ok(blobs)
    }
}
