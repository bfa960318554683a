//! Role guards resolved at extraction time, so handlers cannot skip them.

use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_middleware::Identity;
use futures_util::future::{ready, Ready};
use uuid::Uuid;

use crate::error::AppError;

pub const STUDENTS_ONLY: &str = "only students can start conversations";

/// An authenticated caller allowed to open conversations with landlords.
#[derive(Debug, Clone, Copy)]
pub struct ConversationStarter {
    pub user_id: Uuid,
}

impl FromRequest for ConversationStarter {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let result = Identity::from_request(req, payload)
            .into_inner()
            .and_then(|identity| {
                if identity.role.can_start_conversation() {
                    Ok(ConversationStarter {
                        user_id: identity.user_id,
                    })
                } else {
                    tracing::warn!(
                        user_id = %identity.user_id,
                        role = %identity.role,
                        "rejected conversation start"
                    );
                    Err(AppError::Forbidden(STUDENTS_ONLY).into())
                }
            });
        ready(result)
    }
}
