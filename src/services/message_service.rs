//! Message lifecycle rules: send, edit, soft delete, forwarding, reactions,
//! read receipts, and paginated history.
//!
//! Writes persist first and return the stored row so the gateway broadcasts
//! exactly what the database committed; commit order, not gateway arrival
//! order, is the authoritative sequence for a conversation.

use crate::error::{AppError, AppResult};
use crate::middleware::guards::ConversationMember;
use crate::models::message::{
    Message, MessageType, MessageView, ReactionCount, ReplyPreview,
};
use crate::services::ConversationService;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio_postgres::Row;
use utoipa::ToSchema;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, encryption_key_ref, \
     message_type, media_url, metadata, reply_to_id, is_system_message, \
     created_at, edited_at, deleted_at";

/// Parameters for a new message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<Uuid>,
    pub media_url: Option<String>,
    pub metadata: Option<JsonValue>,
    pub encryption_key_ref: Option<String>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: MessageType::Text,
            reply_to_id: None,
            media_url: None,
            metadata: None,
            encryption_key_ref: None,
        }
    }
}

/// Keyset cursor over `(created_at, id)`; stable under concurrent inserts,
/// unlike offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl HistoryCursor {
    pub fn encode(&self) -> String {
        format!("{}.{}", self.created_at.timestamp_micros(), self.id)
    }

    pub fn decode(raw: &str) -> AppResult<Self> {
        let (micros, id) = raw
            .split_once('.')
            .ok_or_else(|| AppError::Validation("malformed history cursor".into()))?;
        let micros: i64 = micros
            .parse()
            .map_err(|_| AppError::Validation("malformed history cursor".into()))?;
        let created_at = DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| AppError::Validation("malformed history cursor".into()))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| AppError::Validation("malformed history cursor".into()))?;
        Ok(Self { created_at, id })
    }
}

/// One page of history, newest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryPage {
    pub messages: Vec<MessageView>,
    /// Pass back as `cursor` to fetch the next (older) page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub struct MessageService;

impl MessageService {
    fn message_from_row(row: &Row) -> AppResult<Message> {
        let type_str: String = row.get("message_type");
        let message_type = MessageType::from_db(&type_str)
            .ok_or_else(|| AppError::Storage(format!("unknown message type: {type_str}")))?;

        Ok(Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            content: row.get("content"),
            encryption_key_ref: row.get("encryption_key_ref"),
            message_type,
            media_url: row.get("media_url"),
            metadata: row.get("metadata"),
            reply_to_id: row.get("reply_to_id"),
            is_system_message: row.get("is_system_message"),
            created_at: row.get("created_at"),
            edited_at: row.get("edited_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    pub async fn get(db: &Pool, message_id: Uuid) -> AppResult<Message> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1").as_str(),
                &[&message_id],
            )
            .await?
            .ok_or(AppError::NotFound)?;
        Self::message_from_row(&row)
    }

    /// Persist a message and bump the conversation's `last_message_at`.
    /// Returns the stored row for broadcast.
    pub async fn send(
        db: &Pool,
        conversation_id: Uuid,
        sender_id: Uuid,
        new: NewMessage,
    ) -> AppResult<Message> {
        if !ConversationService::is_active_participant(db, conversation_id, sender_id).await? {
            return Err(AppError::Forbidden);
        }
        if new.message_type == MessageType::Text && new.content.trim().is_empty() {
            return Err(AppError::Validation(
                "message content cannot be empty".into(),
            ));
        }

        if let Some(reply_id) = new.reply_to_id {
            let client = db.get().await?;
            let reply_row = client
                .query_opt(
                    "SELECT conversation_id FROM messages WHERE id = $1",
                    &[&reply_id],
                )
                .await?
                .ok_or_else(|| AppError::Validation("reply target does not exist".into()))?;
            let reply_conversation: Uuid = reply_row.get("conversation_id");
            if reply_conversation != conversation_id {
                return Err(AppError::Validation(
                    "reply target belongs to a different conversation".into(),
                ));
            }
        }

        let id = Uuid::new_v4();
        let is_system = new.message_type == MessageType::System;

        let mut client = db.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                format!(
                    "INSERT INTO messages \
                       (id, conversation_id, sender_id, content, encryption_key_ref, \
                        message_type, media_url, metadata, reply_to_id, is_system_message) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                     RETURNING {MESSAGE_COLUMNS}"
                )
                .as_str(),
                &[
                    &id,
                    &conversation_id,
                    &sender_id,
                    &new.content,
                    &new.encryption_key_ref,
                    &new.message_type.to_db(),
                    &new.media_url,
                    &new.metadata,
                    &new.reply_to_id,
                    &is_system,
                ],
            )
            .await?;

        let message = Self::message_from_row(&row)?;

        tx.execute(
            "UPDATE conversations SET last_message_at = $2 WHERE id = $1",
            &[&conversation_id, &message.created_at],
        )
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    /// Edit message content. Only the original sender may edit, and never a
    /// deleted message.
    pub async fn edit(
        db: &Pool,
        message_id: Uuid,
        editor_id: Uuid,
        new_content: &str,
    ) -> AppResult<Message> {
        let message = Self::get(db, message_id).await?;
        if message.sender_id != editor_id {
            return Err(AppError::Forbidden);
        }
        if message.is_deleted() {
            return Err(AppError::Forbidden);
        }
        if message.message_type == MessageType::Text && new_content.trim().is_empty() {
            return Err(AppError::Validation(
                "message content cannot be empty".into(),
            ));
        }

        let client = db.get().await?;
        let row = client
            .query_one(
                format!(
                    "UPDATE messages SET content = $1, edited_at = NOW() \
                     WHERE id = $2 \
                     RETURNING {MESSAGE_COLUMNS}"
                )
                .as_str(),
                &[&new_content, &message_id],
            )
            .await?;
        Self::message_from_row(&row)
    }

    /// Soft delete: sets `deleted_at`, keeps the row. The sender may delete
    /// their own message; a conversation admin may delete anyone's.
    /// Idempotent.
    pub async fn soft_delete(db: &Pool, message_id: Uuid, actor_id: Uuid) -> AppResult<Message> {
        let message = Self::get(db, message_id).await?;

        let member =
            ConversationMember::verify(db, actor_id, message.conversation_id).await?;
        member.can_delete_message(message.sender_id == actor_id)?;

        if message.is_deleted() {
            return Ok(message);
        }

        let client = db.get().await?;
        let row = client
            .query_opt(
                format!(
                    "UPDATE messages SET deleted_at = NOW() \
                     WHERE id = $1 AND deleted_at IS NULL \
                     RETURNING {MESSAGE_COLUMNS}"
                )
                .as_str(),
                &[&message_id],
            )
            .await?;

        match row {
            Some(row) => Self::message_from_row(&row),
            // Lost a delete race; fetch whoever won.
            None => Self::get(db, message_id).await,
        }
    }

    /// Copy a message into another conversation. The copy carries the source
    /// content and a forward marker; it is a new row, so deleting the source
    /// afterwards does not touch it.
    pub async fn forward(
        db: &Pool,
        message_id: Uuid,
        target_conversation_id: Uuid,
        forwarder_id: Uuid,
    ) -> AppResult<Message> {
        let source = Self::get(db, message_id).await?;
        if source.is_deleted() {
            return Err(AppError::Validation(
                "cannot forward a deleted message".into(),
            ));
        }

        if !ConversationService::is_active_participant(db, source.conversation_id, forwarder_id)
            .await?
            || !ConversationService::is_active_participant(
                db,
                target_conversation_id,
                forwarder_id,
            )
            .await?
        {
            return Err(AppError::Forbidden);
        }

        let mut metadata = match source.metadata {
            Some(JsonValue::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        metadata.insert("forwarded".to_string(), JsonValue::Bool(true));

        Self::send(
            db,
            target_conversation_id,
            forwarder_id,
            NewMessage {
                content: source.content,
                message_type: source.message_type,
                reply_to_id: None,
                media_url: source.media_url,
                metadata: Some(JsonValue::Object(metadata)),
                encryption_key_ref: source.encryption_key_ref,
            },
        )
        .await
    }

    /// Add a reaction. Idempotent on the (message, user, emoji) triple.
    /// Returns the conversation id for broadcast and whether a row was added.
    pub async fn react(
        db: &Pool,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<(Uuid, bool)> {
        if emoji.is_empty() || emoji.len() > 20 {
            return Err(AppError::Validation("invalid emoji".into()));
        }

        let message = Self::get(db, message_id).await?;
        if message.is_deleted() {
            return Err(AppError::Validation(
                "cannot react to a deleted message".into(),
            ));
        }
        if !ConversationService::is_active_participant(db, message.conversation_id, user_id).await?
        {
            return Err(AppError::Forbidden);
        }

        let client = db.get().await?;
        let affected = client
            .execute(
                "INSERT INTO message_reactions (message_id, user_id, emoji) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (message_id, user_id, emoji) DO NOTHING",
                &[&message_id, &user_id, &emoji],
            )
            .await?;

        Ok((message.conversation_id, affected > 0))
    }

    /// Remove a reaction. Idempotent; removing an absent reaction is a no-op.
    pub async fn unreact(
        db: &Pool,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<(Uuid, bool)> {
        let message = Self::get(db, message_id).await?;

        let client = db.get().await?;
        let affected = client
            .execute(
                "DELETE FROM message_reactions \
                 WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
                &[&message_id, &user_id, &emoji],
            )
            .await?;

        Ok((message.conversation_id, affected > 0))
    }

    /// Record read receipts for every unread message up to and including
    /// `upto_message_id` and advance the participant's `last_read_at`.
    /// Idempotent under replay: duplicate receipts are no-ops and
    /// `last_read_at` only moves forward.
    pub async fn mark_read(
        db: &Pool,
        conversation_id: Uuid,
        user_id: Uuid,
        upto_message_id: Uuid,
    ) -> AppResult<DateTime<Utc>> {
        if !ConversationService::is_active_participant(db, conversation_id, user_id).await? {
            return Err(AppError::Forbidden);
        }

        let target = Self::get(db, upto_message_id).await?;
        if target.conversation_id != conversation_id {
            return Err(AppError::Validation(
                "message belongs to a different conversation".into(),
            ));
        }

        let mut client = db.get().await?;
        let tx = client.transaction().await?;

        tx.execute(
            "INSERT INTO read_receipts (message_id, user_id, read_at) \
             SELECT m.id, $2, NOW() FROM messages m \
             WHERE m.conversation_id = $1 \
               AND m.deleted_at IS NULL \
               AND m.sender_id <> $2 \
               AND m.created_at <= $3 \
             ON CONFLICT (message_id, user_id) DO NOTHING",
            &[&conversation_id, &user_id, &target.created_at],
        )
        .await?;

        tx.execute(
            "UPDATE conversation_participants \
             SET last_read_at = GREATEST(COALESCE(last_read_at, 'epoch'::timestamptz), $3) \
             WHERE conversation_id = $1 AND user_id = $2",
            &[&conversation_id, &user_id, &target.created_at],
        )
        .await?;

        tx.commit().await?;
        Ok(target.created_at)
    }

    /// Paginated history, newest first, deleted rows redacted, reply targets
    /// joined. Requesters must be or have been participants; past
    /// participants keep read access to what they saw.
    pub async fn list_history(
        db: &Pool,
        conversation_id: Uuid,
        requester_id: Uuid,
        cursor: Option<HistoryCursor>,
        limit: i64,
    ) -> AppResult<HistoryPage> {
        if !ConversationService::was_participant(db, conversation_id, requester_id).await? {
            return Err(AppError::Forbidden);
        }

        let client = db.get().await?;

        let select = "SELECT m.id, m.conversation_id, m.sender_id, m.content, \
                             m.encryption_key_ref, m.message_type, m.media_url, m.metadata, \
                             m.reply_to_id, m.is_system_message, m.created_at, m.edited_at, \
                             m.deleted_at, \
                             r.id AS reply_id, r.sender_id AS reply_sender_id, \
                             r.content AS reply_content, r.deleted_at AS reply_deleted_at \
                      FROM messages m \
                      LEFT JOIN messages r ON r.id = m.reply_to_id \
                      WHERE m.conversation_id = $1";
        let order = "ORDER BY m.created_at DESC, m.id DESC";

        let rows = match cursor {
            Some(c) => {
                let sql =
                    format!("{select} AND (m.created_at, m.id) < ($2, $3) {order} LIMIT $4");
                client
                    .query(sql.as_str(), &[&conversation_id, &c.created_at, &c.id, &limit])
                    .await?
            }
            None => {
                let sql = format!("{select} {order} LIMIT $2");
                client.query(sql.as_str(), &[&conversation_id, &limit]).await?
            }
        };

        let mut messages = Vec::with_capacity(rows.len());
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let message = Self::message_from_row(row)?;
            ids.push(message.id);

            let reply_to = match row.get::<_, Option<Uuid>>("reply_id") {
                Some(reply_id) => Some(ReplyPreview::new(
                    reply_id,
                    row.get("reply_sender_id"),
                    row.get("reply_content"),
                    row.get("reply_deleted_at"),
                )),
                None => None,
            };

            messages.push((message, reply_to));
        }

        let mut reactions = Self::reactions_for(&client, &ids, requester_id).await?;

        let next_cursor = if messages.len() as i64 == limit {
            messages.last().map(|(m, _)| {
                HistoryCursor {
                    created_at: m.created_at,
                    id: m.id,
                }
                .encode()
            })
        } else {
            None
        };

        let views = messages
            .into_iter()
            .map(|(message, reply_to)| {
                let message_reactions = reactions.remove(&message.id).unwrap_or_default();
                MessageView::from_row(message, reply_to, message_reactions)
            })
            .collect();

        Ok(HistoryPage {
            messages: views,
            next_cursor,
        })
    }

    async fn reactions_for(
        client: &deadpool_postgres::Client,
        message_ids: &[Uuid],
        viewer_id: Uuid,
    ) -> AppResult<HashMap<Uuid, Vec<ReactionCount>>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<Uuid> = message_ids.to_vec();
        let rows = client
            .query(
                "SELECT message_id, emoji, COUNT(*) AS count, \
                        BOOL_OR(user_id = $1) AS user_reacted \
                 FROM message_reactions \
                 WHERE message_id = ANY($2) \
                 GROUP BY message_id, emoji \
                 ORDER BY count DESC",
                &[&viewer_id, &ids],
            )
            .await?;

        let mut map: HashMap<Uuid, Vec<ReactionCount>> = HashMap::new();
        for row in rows {
            let message_id: Uuid = row.get("message_id");
            map.entry(message_id).or_default().push(ReactionCount {
                emoji: row.get("emoji"),
                count: row.get("count"),
                user_reacted: row.get("user_reacted"),
            });
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = HistoryCursor {
            created_at: DateTime::<Utc>::from_timestamp_micros(1_721_000_123_456_789).unwrap(),
            id: Uuid::new_v4(),
        };
        let decoded = HistoryCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert!(HistoryCursor::decode("").is_err());
        assert!(HistoryCursor::decode("no-separator").is_err());
        assert!(HistoryCursor::decode("abc.not-a-uuid").is_err());
        assert!(HistoryCursor::decode(&format!("xyz.{}", Uuid::new_v4())).is_err());
    }

    #[test]
    fn test_cursor_decode_is_validation_error() {
        match HistoryCursor::decode("bogus") {
            Err(AppError::Validation(_)) => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_new_message_text_constructor() {
        let new = NewMessage::text("hello");
        assert_eq!(new.content, "hello");
        assert_eq!(new.message_type, MessageType::Text);
        assert!(new.reply_to_id.is_none());
        assert!(new.metadata.is_none());
    }
}
