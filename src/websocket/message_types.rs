//! Inbound client intents and the per-intent error frame.

use crate::error::AppError;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// Client-to-server intents, accepted only on authenticated connections.
///
/// The `send` payload keeps its extra fields raw; the gateway resolves
/// field-name variants through the normalization table before touching the
/// message service.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientIntent {
    #[serde(rename = "join")]
    Join { conversation_id: Uuid },

    #[serde(rename = "leave")]
    Leave { conversation_id: Uuid },

    #[serde(rename = "send")]
    Send {
        conversation_id: Uuid,
        #[serde(flatten)]
        fields: Map<String, JsonValue>,
    },

    #[serde(rename = "typing_start")]
    TypingStart { conversation_id: Uuid },

    #[serde(rename = "typing_stop")]
    TypingStop { conversation_id: Uuid },

    #[serde(rename = "edit")]
    Edit { message_id: Uuid, content: String },

    #[serde(rename = "delete")]
    Delete { message_id: Uuid },

    #[serde(rename = "react")]
    React { message_id: Uuid, emoji: String },

    #[serde(rename = "unreact")]
    Unreact { message_id: Uuid, emoji: String },

    #[serde(rename = "mark_read")]
    MarkRead {
        conversation_id: Uuid,
        upto_message_id: Uuid,
    },
}

impl ClientIntent {
    /// Wire name, echoed back in error frames so optimistic UI knows which
    /// pending action to roll back.
    pub fn intent_name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Send { .. } => "send",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
            Self::React { .. } => "react",
            Self::Unreact { .. } => "unreact",
            Self::MarkRead { .. } => "mark_read",
        }
    }
}

/// Structured error answer for one failed intent. Sent to the originating
/// connection only, never broadcast; the connection stays up.
pub fn error_frame(intent: &str, err: &AppError) -> String {
    let response = err.to_error_response();
    serde_json::json!({
        "type": "error",
        "intent": intent,
        "code": response.code,
        "message": response.message,
        "retryable": err.is_retryable(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_intent() {
        let conversation_id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"join","conversation_id":"{conversation_id}"}}"#);

        match serde_json::from_str::<ClientIntent>(&raw).unwrap() {
            ClientIntent::Join {
                conversation_id: parsed,
            } => assert_eq!(parsed, conversation_id),
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn test_parse_send_intent_keeps_extra_fields() {
        let conversation_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"send","conversation_id":"{conversation_id}","body":"hi","messageType":"text"}}"#
        );

        match serde_json::from_str::<ClientIntent>(&raw).unwrap() {
            ClientIntent::Send { fields, .. } => {
                assert_eq!(fields.get("body").and_then(|v| v.as_str()), Some("hi"));
                assert_eq!(
                    fields.get("messageType").and_then(|v| v.as_str()),
                    Some("text")
                );
            }
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn test_parse_mark_read_intent() {
        let conversation_id = Uuid::new_v4();
        let message_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"mark_read","conversation_id":"{conversation_id}","upto_message_id":"{message_id}"}}"#
        );

        match serde_json::from_str::<ClientIntent>(&raw).unwrap() {
            ClientIntent::MarkRead {
                upto_message_id, ..
            } => assert_eq!(upto_message_id, message_id),
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_intent_is_rejected() {
        assert!(serde_json::from_str::<ClientIntent>(r#"{"type":"shrug"}"#).is_err());
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = error_frame("send", &AppError::Forbidden);
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["type"], "error");
        assert_eq!(value["intent"], "send");
        assert_eq!(value["retryable"], false);
        assert!(value["code"].is_string());
    }

    #[test]
    fn test_error_frame_marks_transient_retryable() {
        let frame = error_frame("send", &AppError::TransientStorage("timeout".into()));
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["retryable"], true);
    }
}
