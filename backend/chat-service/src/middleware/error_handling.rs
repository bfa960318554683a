use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use ::error_types::{error_codes, error_types, ErrorResponse};

/// Maps domain errors to the uniform error body.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => (error_types::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
        AppError::Validation(_) => (error_types::VALIDATION_ERROR, error_codes::INVALID_PAYLOAD),
        AppError::Unauthorized => (error_types::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::Forbidden(reason) => (error_types::AUTHORIZATION_ERROR, forbidden_code(reason)),
        AppError::NotFound(what) => (error_types::NOT_FOUND_ERROR, not_found_code(what)),
        AppError::Database(_) => (error_types::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::ServiceUnavailable(_) => (
            error_types::SERVICE_UNAVAILABLE_ERROR,
            error_codes::SERVICE_UNAVAILABLE,
        ),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
            (error_types::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    };

    // Datastore details stay in the logs.
    let message = match err {
        AppError::Database(detail) => {
            tracing::error!(error = %detail, "database error");
            "database error".to_string()
        }
        other => other.to_string(),
    };

    let response = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

fn not_found_code(what: &str) -> &'static str {
    match what {
        "conversation" => error_codes::CONVERSATION_NOT_FOUND,
        "message" => error_codes::MESSAGE_NOT_FOUND,
        "property" => error_codes::PROPERTY_NOT_FOUND,
        _ => error_codes::RESOURCE_NOT_FOUND,
    }
}

fn forbidden_code(reason: &str) -> &'static str {
    match reason {
        crate::store::NOT_PARTICIPANT => error_codes::NOT_CONVERSATION_PARTICIPANT,
        crate::store::NOT_AUTHOR => error_codes::NOT_MESSAGE_AUTHOR,
        _ => error_codes::ACTION_FORBIDDEN,
    }
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    HttpResponse::build(status).json(response)
}
