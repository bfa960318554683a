use actix_middleware::Identity;
use actix_web::{get, post, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use uuid::Uuid;

use chat_schema::api::ChannelToken;

use crate::error::AppError;
use crate::realtime::ChannelSession;
use crate::state::AppState;

/// POST /realtime/token
/// Issues a channel credential for the authenticated caller only.
#[post("/realtime/token")]
pub async fn issue_channel_token(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, AppError> {
    let issued = state.channel_keys.issue(identity.user_id).map_err(|e| {
        tracing::error!(user_id = %identity.user_id, error = %e, "failed to sign channel token");
        AppError::Internal
    })?;
    Ok(HttpResponse::Ok().json(ChannelToken {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /ws/conversations/{id}?token=<channel token>
/// The credential is checked before the upgrade; membership is not re-checked.
#[get("/ws/conversations/{id}")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let conversation_id = conversation_id.into_inner();
    let token = query.into_inner().token.ok_or_else(|| {
        tracing::warn!(
            conversation_id = %conversation_id,
            "realtime connection rejected: no token"
        );
        AppError::Unauthorized
    })?;

    let user_id = state.channel_keys.validate(&token).map_err(|e| {
        tracing::warn!(
            conversation_id = %conversation_id,
            error = %e,
            "realtime connection rejected"
        );
        AppError::Unauthorized
    })?;

    let session = ChannelSession::new(conversation_id, user_id, state.realtime.clone());
    ws::start(session, &req, stream)
}
