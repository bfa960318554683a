use serde::{Deserialize, Serialize};

/// Uniform API error body returned by every chat endpoint.
///
/// The client crate deserializes the same structure, so field names are part
/// of the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable HTTP reason ("Not Found", "Forbidden", ...)
    pub error: String,

    /// User-facing explanation
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error family used by clients for routing:
    /// - "validation_error" - payload rejected
    /// - "authentication_error" - no or invalid identity
    /// - "authorization_error" - authenticated but not allowed
    /// - "not_found_error" - conversation/message unresolvable
    /// - "server_error" - datastore or internal failure
    /// - "service_unavailable_error" - collaborator unavailable
    pub error_type: String,

    /// Stable machine-readable code, e.g. "CONVERSATION_NOT_FOUND"
    pub code: String,

    /// Optional detail, only populated outside production
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Request id for log correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

/// Stable error codes
pub mod error_codes {
    // Authentication
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";

    // Chat
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const PROPERTY_NOT_FOUND: &str = "PROPERTY_NOT_FOUND";
    pub const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
    pub const NOT_CONVERSATION_PARTICIPANT: &str = "NOT_CONVERSATION_PARTICIPANT";
    pub const NOT_MESSAGE_AUTHOR: &str = "NOT_MESSAGE_AUTHOR";
    pub const ACTION_FORBIDDEN: &str = "ACTION_FORBIDDEN";
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Error families
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::new(
            "Not Found",
            "conversation not found",
            404,
            error_types::NOT_FOUND_ERROR,
            error_codes::CONVERSATION_NOT_FOUND,
        );

        assert_eq!(error.status, 404);
        assert_eq!(error.error_type, error_types::NOT_FOUND_ERROR);
        assert_eq!(error.code, error_codes::CONVERSATION_NOT_FOUND);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let error = ErrorResponse::new(
            "Forbidden",
            "forbidden",
            403,
            error_types::AUTHORIZATION_ERROR,
            error_codes::NOT_MESSAGE_AUTHOR,
        );

        let json = serde_json::to_value(&error).unwrap();
        assert!(json.get("details").is_none());
        assert!(json.get("trace_id").is_none());

        let with_trace = error.with_trace_id("req-1".to_string());
        let json = serde_json::to_value(&with_trace).unwrap();
        assert_eq!(json["trace_id"], "req-1");
    }
}
