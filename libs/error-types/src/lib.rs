//! Shared error-response envelope for the alumni platform services.
//!
//! Every HTTP error leaving a service is rendered as an [`ErrorResponse`] so
//! clients can route on `error_type` and localize on `code` without parsing
//! free-form messages.

use serde::{Deserialize, Serialize};

/// Unified API error response format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short error title (e.g. "Forbidden").
    pub error: String,

    /// Human-readable message.
    pub message: String,

    /// HTTP status code.
    pub status: u16,

    /// Error family used for client-side routing, one of the
    /// [`error_types`] constants.
    pub error_type: String,

    /// Stable machine code, one of the [`error_codes`] constants.
    pub code: String,

    /// Optional detail, returned only in development builds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Request trace id for log correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// ISO 8601 timestamp.
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

/// Stable machine codes, prefixed per concern.
pub mod error_codes {
    // Authentication
    pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";

    // Messaging
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const NOT_CONVERSATION_PARTICIPANT: &str = "NOT_CONVERSATION_PARTICIPANT";
    pub const CONVERSATION_CONFLICT: &str = "CONVERSATION_CONFLICT";
    pub const MESSAGE_DELETED: &str = "MESSAGE_DELETED";

    // Validation
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const STORAGE_TIMEOUT: &str = "STORAGE_TIMEOUT";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Error families for client-side routing.
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const CONFLICT_ERROR: &str = "conflict_error";
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
            "Conversation not found",
            404,
            error_types::NOT_FOUND_ERROR,
            error_codes::CONVERSATION_NOT_FOUND,
        );

        assert_eq!(error.status, 404);
        assert_eq!(error.error_type, error_types::NOT_FOUND_ERROR);
        assert_eq!(error.code, error_codes::CONVERSATION_NOT_FOUND);
        assert!(error.details.is_none());
    }

    #[test]
    fn test_error_response_with_details() {
        let error = ErrorResponse::new(
            "Bad Request",
            "Message content cannot be empty",
            400,
            error_types::VALIDATION_ERROR,
            error_codes::INVALID_REQUEST,
        )
        .with_details("content was an empty string".to_string());

        assert!(error.details.is_some());
    }

    #[test]
    fn test_serialization_skips_empty_optionals() {
        let error = ErrorResponse::new(
            "Forbidden",
            "not a participant",
            403,
            error_types::AUTHORIZATION_ERROR,
            error_codes::NOT_CONVERSATION_PARTICIPANT,
        );

        let json = serde_json::to_value(&error).unwrap();
        assert!(json.get("details").is_none());
        assert!(json.get("trace_id").is_none());
        assert_eq!(json["status"], 403);
    }
}
