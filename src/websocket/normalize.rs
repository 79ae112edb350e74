//! Payload field-name normalization at the gateway boundary.
//!
//! Clients and older frontends disagree on key names for the same message
//! attributes (`body` vs `content`, `replyToId` vs `reply_to_id`). Variants
//! are resolved exactly once, here, against a fixed alias table; no other
//! component guesses at field names. Sender identity is never read from the
//! payload: it always comes from the authenticated connection.

use crate::error::{AppError, AppResult};
use crate::models::message::MessageType;
use crate::services::message_service::NewMessage;
use once_cell::sync::Lazy;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// Canonical field -> accepted aliases, first match wins.
static FIELD_ALIASES: Lazy<Vec<(&'static str, &'static [&'static str])>> = Lazy::new(|| {
    vec![
        ("content", &["content", "body", "text"] as &[_]),
        ("message_type", &["message_type", "messageType", "kind"]),
        ("reply_to_id", &["reply_to_id", "replyToId", "reply_to"]),
        ("media_url", &["media_url", "mediaUrl", "attachment_url"]),
        ("metadata", &["metadata", "media_metadata"]),
        (
            "encryption_key_ref",
            &["encryption_key_ref", "encryptionKeyRef", "key_ref"],
        ),
    ]
});

fn lookup<'a>(fields: &'a Map<String, JsonValue>, canonical: &str) -> Option<&'a JsonValue> {
    let (_, aliases) = FIELD_ALIASES
        .iter()
        .find(|(name, _)| *name == canonical)?;
    aliases.iter().find_map(|alias| fields.get(*alias))
}

fn lookup_str<'a>(fields: &'a Map<String, JsonValue>, canonical: &str) -> Option<&'a str> {
    lookup(fields, canonical).and_then(|v| v.as_str())
}

/// Resolve a raw `send` payload into canonical message parameters.
pub fn normalize_send(fields: &Map<String, JsonValue>) -> AppResult<NewMessage> {
    let message_type = match lookup_str(fields, "message_type") {
        Some(raw) => MessageType::from_db(&raw.to_lowercase())
            .ok_or_else(|| AppError::Validation(format!("unknown message type: {raw}")))?,
        None => MessageType::Text,
    };

    let content = lookup_str(fields, "content").unwrap_or_default().to_string();

    let reply_to_id = match lookup_str(fields, "reply_to_id") {
        Some(raw) => Some(
            Uuid::parse_str(raw)
                .map_err(|_| AppError::Validation("reply_to_id is not a valid id".into()))?,
        ),
        None => None,
    };

    let media_url = lookup_str(fields, "media_url").map(|s| s.to_string());
    let metadata = lookup(fields, "metadata")
        .filter(|v| v.is_object())
        .cloned();
    let encryption_key_ref = lookup_str(fields, "encryption_key_ref").map(|s| s.to_string());

    Ok(NewMessage {
        content,
        message_type,
        reply_to_id,
        media_url,
        metadata,
        encryption_key_ref,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(json: JsonValue) -> Map<String, JsonValue> {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn test_canonical_names_pass_through() {
        let new = normalize_send(&fields(serde_json::json!({
            "content": "hello",
            "message_type": "text",
        })))
        .unwrap();

        assert_eq!(new.content, "hello");
        assert_eq!(new.message_type, MessageType::Text);
    }

    #[test]
    fn test_camel_case_variants_resolve() {
        let reply = Uuid::new_v4();
        let new = normalize_send(&fields(serde_json::json!({
            "body": "hi there",
            "messageType": "image",
            "replyToId": reply.to_string(),
            "mediaUrl": "https://cdn.example/a.png",
        })))
        .unwrap();

        assert_eq!(new.content, "hi there");
        assert_eq!(new.message_type, MessageType::Image);
        assert_eq!(new.reply_to_id, Some(reply));
        assert_eq!(new.media_url.as_deref(), Some("https://cdn.example/a.png"));
    }

    #[test]
    fn test_first_alias_wins() {
        let new = normalize_send(&fields(serde_json::json!({
            "content": "canonical",
            "body": "legacy",
        })))
        .unwrap();

        assert_eq!(new.content, "canonical");
    }

    #[test]
    fn test_sender_fields_in_payload_are_ignored() {
        // Identity comes from the connection; a spoofed sender key is inert.
        let new = normalize_send(&fields(serde_json::json!({
            "content": "hello",
            "sender_id": Uuid::new_v4().to_string(),
            "senderId": Uuid::new_v4().to_string(),
        })))
        .unwrap();

        assert_eq!(new.content, "hello");
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let err = normalize_send(&fields(serde_json::json!({
            "content": "x",
            "kind": "hologram",
        })))
        .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_bad_reply_id_rejected() {
        let err = normalize_send(&fields(serde_json::json!({
            "content": "x",
            "reply_to": "not-a-uuid",
        })))
        .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_missing_content_defaults_to_empty() {
        // The message service decides whether empty content is acceptable
        // for the message type.
        let new = normalize_send(&fields(serde_json::json!({
            "mediaUrl": "https://cdn.example/file.pdf",
            "kind": "file",
        })))
        .unwrap();

        assert_eq!(new.content, "");
        assert_eq!(new.message_type, MessageType::File);
    }
}
