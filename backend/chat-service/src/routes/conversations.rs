use actix_middleware::Identity;
use actix_web::{delete, get, post, web, HttpResponse};
use uuid::Uuid;

use chat_schema::api::{SendMessageRequest, StartConversationRequest, UnreadTotal};

use crate::error::AppError;
use crate::middleware::guards::ConversationStarter;
use crate::state::AppState;
use crate::store::NewMessage;

/// GET /conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, AppError> {
    let conversations = state.directory.list_conversations(identity.user_id).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// POST /conversations
/// 201 when the conversation was created, 200 when it already existed.
#[post("/conversations")]
pub async fn start_conversation(
    state: web::Data<AppState>,
    starter: ConversationStarter,
    body: web::Json<StartConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let lookup = state
        .directory
        .start_conversation(starter.user_id, body.property_id, body.landlord_id)
        .await?;

    let mut response = if lookup.created {
        HttpResponse::Created()
    } else {
        HttpResponse::Ok()
    };
    Ok(response.json(lookup.conversation))
}

#[get("/conversations/unread-total")]
pub async fn unread_total(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, AppError> {
    let total = state.directory.total_unread(identity.user_id).await?;
    Ok(HttpResponse::Ok().json(UnreadTotal { total }))
}

/// GET /conversations/{id}/messages
#[get("/conversations/{id}/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    identity: Identity,
) -> Result<HttpResponse, AppError> {
    let history = state
        .directory
        .message_history(conversation_id.into_inner(), identity.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(history))
}

/// POST /conversations/{id}/messages
/// Live delivery is left to the sender's realtime session.
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    identity: Identity,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let message = state
        .messages
        .send(
            conversation_id.into_inner(),
            identity.user_id,
            NewMessage {
                body: body.body,
                reply_to: body.reply_to,
            },
        )
        .await?;
    let view = state.directory.view_message(message).await?;
    Ok(HttpResponse::Created().json(view))
}

/// POST /conversations/{id}/read
#[post("/conversations/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    identity: Identity,
) -> Result<HttpResponse, AppError> {
    state
        .messages
        .mark_read(conversation_id.into_inner(), identity.user_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /conversations/{id}
#[delete("/conversations/{id}")]
pub async fn delete_conversation(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    identity: Identity,
) -> Result<HttpResponse, AppError> {
    state
        .messages
        .delete_conversation(conversation_id.into_inner(), identity.user_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
