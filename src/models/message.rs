//! Message rows and their client-facing projection.
//!
//! Messages are soft-deleted: the row stays for referential integrity (reply
//! targets, receipts) but every projection renders redacted content. The raw
//! `content` of a deleted message never leaves the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Placeholder rendered wherever a deleted message would appear, including
/// reply previews.
pub const DELETED_PLACEHOLDER: &str = "[message deleted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    Link,
    System,
}

impl MessageType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            "link" => Some(Self::Link),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Link => "link",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

/// Message row matching the `messages` relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    /// Opaque handle owned by the crypto collaborator
    pub encryption_key_ref: Option<String>,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    /// Media metadata and the forward marker
    pub metadata: Option<JsonValue>,
    pub reply_to_id: Option<Uuid>,
    pub is_system_message: bool,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Reaction aggregate for one emoji on one message
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: i64,
    /// Whether the requesting user has this reaction
    pub user_reacted: bool,
}

/// Redacted preview of the message a reply points at. Always renders, even
/// when the target was deleted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub deleted: bool,
}

impl ReplyPreview {
    pub fn new(id: Uuid, sender_id: Uuid, content: String, deleted_at: Option<DateTime<Utc>>) -> Self {
        let deleted = deleted_at.is_some();
        Self {
            id,
            sender_id,
            content: if deleted {
                DELETED_PLACEHOLDER.to_string()
            } else {
                content
            },
            deleted,
        }
    }
}

/// Client-facing message projection: deleted content redacted, reply target
/// joined, reactions aggregated.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub metadata: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    pub is_system_message: bool,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    #[serde(default)]
    pub reactions: Vec<ReactionCount>,
}

impl MessageView {
    /// Project a row for clients. Deleted messages keep their id and
    /// timestamps but lose content, media, and metadata.
    pub fn from_row(msg: Message, reply_to: Option<ReplyPreview>, reactions: Vec<ReactionCount>) -> Self {
        let deleted = msg.is_deleted();
        Self {
            id: msg.id,
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            content: if deleted {
                DELETED_PLACEHOLDER.to_string()
            } else {
                msg.content
            },
            message_type: msg.message_type,
            media_url: if deleted { None } else { msg.media_url },
            metadata: if deleted { None } else { msg.metadata },
            reply_to,
            is_system_message: msg.is_system_message,
            created_at: msg.created_at,
            edited_at: msg.edited_at,
            deleted,
            reactions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(deleted: bool) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: "hello".to_string(),
            encryption_key_ref: None,
            message_type: MessageType::Text,
            media_url: Some("https://cdn.example/pic.png".to_string()),
            metadata: Some(serde_json::json!({"width": 800})),
            reply_to_id: None,
            is_system_message: false,
            created_at: Utc::now(),
            edited_at: None,
            deleted_at: deleted.then(Utc::now),
        }
    }

    #[test]
    fn test_live_message_renders_content() {
        let view = MessageView::from_row(sample_message(false), None, Vec::new());
        assert_eq!(view.content, "hello");
        assert!(!view.deleted);
        assert!(view.media_url.is_some());
    }

    #[test]
    fn test_deleted_message_renders_redacted() {
        let view = MessageView::from_row(sample_message(true), None, Vec::new());
        assert_eq!(view.content, DELETED_PLACEHOLDER);
        assert!(view.deleted);
        assert!(view.media_url.is_none());
        assert!(view.metadata.is_none());
    }

    #[test]
    fn test_reply_preview_redacts_deleted_target() {
        let live = ReplyPreview::new(Uuid::new_v4(), Uuid::new_v4(), "original".into(), None);
        assert_eq!(live.content, "original");
        assert!(!live.deleted);

        let gone = ReplyPreview::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "original".into(),
            Some(Utc::now()),
        );
        assert_eq!(gone.content, DELETED_PLACEHOLDER);
        assert!(gone.deleted);
    }

    #[test]
    fn test_message_type_db_round_trip() {
        for ty in [
            MessageType::Text,
            MessageType::Image,
            MessageType::File,
            MessageType::Link,
            MessageType::System,
        ] {
            assert_eq!(MessageType::from_db(ty.to_db()), Some(ty));
        }
        assert_eq!(MessageType::from_db("video"), None);
    }
}
