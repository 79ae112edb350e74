//! Gateway event catalog.
//!
//! Every real-time event shares one flat JSON shape:
//!
//! ```json
//! {
//!     "type": "message:new",
//!     "timestamp": "2026-02-11T10:30:00Z",
//!     ...event fields
//! }
//! ```
//!
//! Serialization is centralized here; handlers never hand-build event JSON.

use crate::error::AppError;
use crate::models::message::MessageView;
use crate::websocket::{ConnectionId, RoomRegistry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Server-to-client events, one variant per wire type.
///
/// Untagged: each variant serializes as its bare field object, which
/// [`GatewayEvent::to_payload_value`] then flattens under the common
/// envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GatewayEvent {
    /// New message accepted; carries the full stored projection so clients
    /// reconcile against exactly what the database committed.
    MessageNew { message: MessageView },

    MessageEdited {
        conversation_id: Uuid,
        message_id: Uuid,
        content: String,
        edited_at: DateTime<Utc>,
    },

    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    ReactionUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
        added: bool,
    },

    ReadReceipt {
        conversation_id: Uuid,
        user_id: Uuid,
        upto_message_id: Uuid,
        read_at: DateTime<Utc>,
    },

    /// Ephemeral; never persisted, superseded by the next indicator.
    TypingStart {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    TypingStop {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    /// Join/leave acknowledgements, sent to the originating connection only.
    RoomJoined { conversation_id: Uuid },
    RoomLeft { conversation_id: Uuid },
}

impl GatewayEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message:new",
            Self::MessageEdited { .. } => "message:edited",
            Self::MessageDeleted { .. } => "message:deleted",
            Self::ReactionUpdated { .. } => "reaction:updated",
            Self::ReadReceipt { .. } => "read:receipt",
            Self::TypingStart { .. } => "typing:start",
            Self::TypingStop { .. } => "typing:stop",
            Self::RoomJoined { .. } => "room:joined",
            Self::RoomLeft { .. } => "room:left",
        }
    }

    pub fn to_payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut payload = serde_json::json!({
            "type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        let event_data = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = event_data {
            for (key, value) in map {
                payload[key] = value;
            }
        }

        Ok(payload)
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        self.to_payload_value().map(|v| v.to_string())
    }
}

/// Serialize and fan an event out to a room through the registry's
/// single-pass exclusion broadcast. Returns the delivery count.
pub async fn broadcast_event(
    registry: &RoomRegistry,
    conversation_id: Uuid,
    event: &GatewayEvent,
    exclude: &HashSet<ConnectionId>,
) -> Result<usize, AppError> {
    let payload = event
        .to_payload()
        .map_err(|e| AppError::Transport(format!("serialize event: {e}")))?;
    Ok(registry.broadcast(conversation_id, &payload, exclude).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{Message, MessageType};

    #[test]
    fn test_event_type_names_match_wire_contract() {
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        assert_eq!(
            GatewayEvent::TypingStart {
                conversation_id,
                user_id
            }
            .event_type(),
            "typing:start"
        );
        assert_eq!(
            GatewayEvent::RoomJoined { conversation_id }.event_type(),
            "room:joined"
        );
        assert_eq!(
            GatewayEvent::MessageDeleted {
                conversation_id,
                message_id: Uuid::new_v4()
            }
            .event_type(),
            "message:deleted"
        );
    }

    #[test]
    fn test_payload_is_flat_with_envelope_fields() {
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let event = GatewayEvent::TypingStart {
            conversation_id,
            user_id,
        };
        let payload: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();

        assert_eq!(payload["type"], "typing:start");
        assert_eq!(payload["conversation_id"], conversation_id.to_string());
        assert_eq!(payload["user_id"], user_id.to_string());
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn test_message_new_carries_full_projection() {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            content: "hello".into(),
            encryption_key_ref: None,
            message_type: MessageType::Text,
            media_url: None,
            metadata: None,
            reply_to_id: None,
            is_system_message: false,
            created_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
        };
        let view = MessageView::from_row(message, None, Vec::new());
        let message_id = view.id;

        let event = GatewayEvent::MessageNew { message: view };
        let payload: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();

        assert_eq!(payload["type"], "message:new");
        assert_eq!(payload["message"]["id"], message_id.to_string());
        assert_eq!(payload["message"]["content"], "hello");
    }

    #[test]
    fn test_reaction_updated_payload() {
        let event = GatewayEvent::ReactionUpdated {
            conversation_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            emoji: "👍".into(),
            added: true,
        };
        let payload: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();

        assert_eq!(payload["type"], "reaction:updated");
        assert_eq!(payload["emoji"], "👍");
        assert_eq!(payload["added"], true);
    }
}
