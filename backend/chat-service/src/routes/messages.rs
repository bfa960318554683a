use actix_middleware::Identity;
use actix_web::{delete, patch, post, web, HttpResponse};
use uuid::Uuid;

use chat_schema::api::{DeleteMessageRequest, EditMessageRequest, ReactRequest};
use chat_schema::{ChannelEvent, Reaction};

use crate::error::AppError;
use crate::state::AppState;
use crate::store::DeletedMessage;

/// PATCH /messages/{id}
#[patch("/messages/{id}")]
pub async fn edit_message(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    identity: Identity,
    body: web::Json<EditMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .messages
        .edit(message_id.into_inner(), identity.user_id, &body.content)
        .await?;
    let conversation_id = message.conversation_id;
    let view = state.directory.view_message(message).await?;

    state
        .realtime
        .publish(conversation_id, ChannelEvent::MessageEdited(view.clone()), None);
    Ok(HttpResponse::Ok().json(view))
}

/// DELETE /messages/{id}
/// The body is optional; without one the message is hidden for the caller only.
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    identity: Identity,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let request = if body.is_empty() {
        DeleteMessageRequest {
            delete_for_everyone: false,
        }
    } else {
        serde_json::from_slice::<DeleteMessageRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("invalid delete body: {e}")))?
    };

    let message_id = message_id.into_inner();
    let deleted = state
        .messages
        .delete(message_id, identity.user_id, request.delete_for_everyone)
        .await?;

    if let DeletedMessage::ForEveryone { message, .. } = &deleted {
        state.realtime.publish(
            message.conversation_id,
            ChannelEvent::MessageDeleted { message_id },
            None,
        );
    }
    Ok(HttpResponse::NoContent().finish())
}

/// POST /messages/{id}/react
#[post("/messages/{id}/react")]
pub async fn react(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    identity: Identity,
    body: web::Json<ReactRequest>,
) -> Result<HttpResponse, AppError> {
    let message_id = message_id.into_inner();
    let message = state
        .messages
        .react(message_id, identity.user_id, &body.emoji)
        .await?;

    state.realtime.publish(
        message.conversation_id,
        ChannelEvent::ReactionAdded {
            message_id,
            reaction: Reaction {
                user_id: identity.user_id,
                emoji: body.emoji.clone(),
            },
        },
        None,
    );
    Ok(HttpResponse::Ok().json(message))
}
