use actix_middleware::JwtAuth;
use actix_web::{get, web, HttpResponse};
use crypto_core::JwtVerifier;
use std::sync::Arc;

use crate::error::AppError;
use crate::metrics::metrics_handler;

pub mod conversations;
pub mod messages;
pub mod realtime;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// Registers every route. Everything under `/api/v1` requires an identity token.
pub fn configure(verifier: Arc<JwtVerifier>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(
            web::JsonConfig::default()
                .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
        )
        .app_data(
            web::PathConfig::default()
                .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
        )
        .service(health)
        .route("/metrics", web::get().to(metrics_handler))
        .service(realtime::ws_handler)
        .service(
            web::scope("/api/v1")
                .wrap(JwtAuth::new(verifier))
                .service(conversations::list_conversations)
                .service(conversations::start_conversation)
                .service(conversations::unread_total)
                .service(conversations::get_messages)
                .service(conversations::send_message)
                .service(conversations::mark_read)
                .service(conversations::delete_conversation)
                .service(messages::edit_message)
                .service(messages::delete_message)
                .service(messages::react)
                .service(realtime::issue_channel_token),
        );
    }
}
