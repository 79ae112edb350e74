//! Conversation lifecycle rules: creation, uniqueness, membership, archival.
//!
//! Creation races for direct and content-linked conversations are resolved
//! by the partial unique indexes in the schema, not by application locks: a
//! duplicate insert loses with a unique violation and re-reads the winning
//! row.

use crate::error::{AppError, AppResult};
use crate::models::conversation::{
    direct_key, Conversation, ConversationType, Participant, ParticipantRole,
};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use tokio_postgres::Row;
use utoipa::ToSchema;
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = "id, conversation_type, name, linked_content_id, created_by, \
     created_at, last_message_at, is_archived, archived_at";

/// Conversation plus the viewer's membership context, as returned by the
/// conversation list endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub role: ParticipantRole,
    pub is_muted: bool,
    pub last_read_at: Option<DateTime<Utc>>,
    /// Messages newer than the viewer's `last_read_at`, excluding deleted
    /// rows and the viewer's own messages.
    pub unread_count: i64,
}

pub struct ConversationService;

impl ConversationService {
    fn conversation_from_row(row: &Row) -> AppResult<Conversation> {
        let type_str: String = row.get("conversation_type");
        let conversation_type = ConversationType::from_db(&type_str)
            .ok_or_else(|| AppError::Storage(format!("unknown conversation type: {type_str}")))?;

        Ok(Conversation {
            id: row.get("id"),
            conversation_type,
            name: row.get("name"),
            linked_content_id: row.get("linked_content_id"),
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
            last_message_at: row.get("last_message_at"),
            is_archived: row.get("is_archived"),
            archived_at: row.get("archived_at"),
        })
    }

    fn participant_from_row(row: &Row) -> AppResult<Participant> {
        let role_str: String = row.get("role");
        let role = ParticipantRole::from_db(&role_str)
            .ok_or_else(|| AppError::Storage(format!("unknown role: {role_str}")))?;

        Ok(Participant {
            conversation_id: row.get("conversation_id"),
            user_id: row.get("user_id"),
            role,
            joined_at: row.get("joined_at"),
            left_at: row.get("left_at"),
            last_read_at: row.get("last_read_at"),
            is_muted: row.get("is_muted"),
        })
    }

    /// Look up the active direct conversation for a user pair, creating it
    /// with both users as admins when none exists. Safe under concurrent
    /// calls from both sides: the loser of the insert race re-reads the
    /// winner's row.
    pub async fn get_or_create_direct(
        db: &Pool,
        user_a: Uuid,
        user_b: Uuid,
    ) -> AppResult<Conversation> {
        if user_a == user_b {
            return Err(AppError::Validation(
                "cannot open a direct conversation with yourself".into(),
            ));
        }

        let key = direct_key(user_a, user_b);

        if let Some(existing) = Self::find_active_direct(db, &key).await? {
            return Ok(existing);
        }

        match Self::insert_direct(db, &key, user_a, user_b).await {
            Ok(conversation) => Ok(conversation),
            Err(AppError::Conflict(_)) => Self::find_active_direct(db, &key)
                .await?
                .ok_or_else(|| AppError::Conflict("direct conversation race unresolved".into())),
            Err(e) => Err(e),
        }
    }

    async fn find_active_direct(db: &Pool, key: &str) -> AppResult<Option<Conversation>> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE direct_key = $1 AND NOT is_archived"
                ).as_str(),
                &[&key],
            )
            .await?;

        row.as_ref().map(Self::conversation_from_row).transpose()
    }

    async fn insert_direct(
        db: &Pool,
        key: &str,
        user_a: Uuid,
        user_b: Uuid,
    ) -> AppResult<Conversation> {
        let id = Uuid::new_v4();
        let mut client = db.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                format!(
                    "INSERT INTO conversations (id, conversation_type, direct_key, created_by) \
                     VALUES ($1, 'direct', $2, $3) \
                     RETURNING {CONVERSATION_COLUMNS}"
                ).as_str(),
                &[&id, &key, &user_a],
            )
            .await?;

        tx.execute(
            "INSERT INTO conversation_participants (conversation_id, user_id, role) \
             VALUES ($1, $2, 'admin'), ($1, $3, 'admin')",
            &[&id, &user_a, &user_b],
        )
        .await?;

        tx.commit().await?;
        Self::conversation_from_row(&row)
    }

    /// Look up the active conversation linked to a piece of content, creating
    /// it when none exists. The caller always ends up an active participant
    /// so a follow-up send succeeds.
    pub async fn get_or_create_content_linked(
        db: &Pool,
        content_id: &str,
        creator_id: Uuid,
    ) -> AppResult<Conversation> {
        if content_id.is_empty() {
            return Err(AppError::Validation("linked content id missing".into()));
        }

        if let Some(existing) = Self::find_active_content_linked(db, content_id).await? {
            Self::ensure_participant(db, existing.id, creator_id, ParticipantRole::Member).await?;
            return Ok(existing);
        }

        match Self::insert_content_linked(db, content_id, creator_id).await {
            Ok(conversation) => Ok(conversation),
            Err(AppError::Conflict(_)) => {
                let winner = Self::find_active_content_linked(db, content_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Conflict("content-linked conversation race unresolved".into())
                    })?;
                Self::ensure_participant(db, winner.id, creator_id, ParticipantRole::Member)
                    .await?;
                Ok(winner)
            }
            Err(e) => Err(e),
        }
    }

    async fn find_active_content_linked(
        db: &Pool,
        content_id: &str,
    ) -> AppResult<Option<Conversation>> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE conversation_type = 'content_linked' \
                       AND linked_content_id = $1 AND NOT is_archived"
                ).as_str(),
                &[&content_id],
            )
            .await?;

        row.as_ref().map(Self::conversation_from_row).transpose()
    }

    async fn insert_content_linked(
        db: &Pool,
        content_id: &str,
        creator_id: Uuid,
    ) -> AppResult<Conversation> {
        let id = Uuid::new_v4();
        let mut client = db.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                format!(
                    "INSERT INTO conversations (id, conversation_type, linked_content_id, created_by) \
                     VALUES ($1, 'content_linked', $2, $3) \
                     RETURNING {CONVERSATION_COLUMNS}"
                ).as_str(),
                &[&id, &content_id, &creator_id],
            )
            .await?;

        tx.execute(
            "INSERT INTO conversation_participants (conversation_id, user_id, role) \
             VALUES ($1, $2, 'admin')",
            &[&id, &creator_id],
        )
        .await?;

        tx.commit().await?;
        Self::conversation_from_row(&row)
    }

    /// Create a group conversation. The creator becomes admin, everyone in
    /// `member_ids` a member.
    pub async fn create_group(
        db: &Pool,
        creator_id: Uuid,
        name: &str,
        member_ids: &[Uuid],
        max_members: usize,
    ) -> AppResult<Conversation> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("group name cannot be empty".into()));
        }
        if name.len() > 255 {
            return Err(AppError::Validation("group name too long (max 255)".into()));
        }
        if member_ids.is_empty() {
            return Err(AppError::Validation(
                "group conversation needs at least one member".into(),
            ));
        }

        let mut all_members = vec![creator_id];
        for member_id in member_ids {
            if !all_members.contains(member_id) {
                all_members.push(*member_id);
            }
        }
        if all_members.len() > max_members {
            return Err(AppError::Validation(format!(
                "group exceeds maximum of {max_members} members"
            )));
        }

        let id = Uuid::new_v4();
        let mut client = db.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                format!(
                    "INSERT INTO conversations (id, conversation_type, name, created_by) \
                     VALUES ($1, 'group', $2, $3) \
                     RETURNING {CONVERSATION_COLUMNS}"
                ).as_str(),
                &[&id, &name, &creator_id],
            )
            .await?;

        for member_id in &all_members {
            let role = if *member_id == creator_id {
                ParticipantRole::Admin
            } else {
                ParticipantRole::Member
            };
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id, role) \
                 VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                &[&id, member_id, &role.to_db()],
            )
            .await?;
        }

        tx.commit().await?;
        Self::conversation_from_row(&row)
    }

    /// Add a participant. Admin-only; re-adding someone who left reactivates
    /// their membership instead of duplicating the row.
    pub async fn add_participant(
        db: &Pool,
        redis: &crate::redis_client::RedisClient,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        let conversation = Self::get(db, conversation_id).await?;
        if conversation.is_archived {
            return Err(AppError::Validation("conversation is archived".into()));
        }
        if conversation.conversation_type == ConversationType::Direct {
            return Err(AppError::Validation(
                "direct conversations have a fixed participant pair".into(),
            ));
        }

        Self::require_admin(db, conversation_id, actor_id).await?;
        Self::ensure_participant(db, conversation_id, user_id, ParticipantRole::Member).await?;
        Self::invalidate_membership_cache(redis, conversation_id, user_id).await;
        Ok(())
    }

    async fn ensure_participant(
        db: &Pool,
        conversation_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
    ) -> AppResult<()> {
        let client = db.get().await?;
        client
            .execute(
                "INSERT INTO conversation_participants (conversation_id, user_id, role) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (conversation_id, user_id) DO UPDATE SET left_at = NULL",
                &[&conversation_id, &user_id, &role.to_db()],
            )
            .await?;
        Ok(())
    }

    /// Soft-remove a participant: sets `left_at`, history stays attributed.
    /// Admins may remove anyone; a user may always remove themselves.
    pub async fn remove_participant(
        db: &Pool,
        redis: &crate::redis_client::RedisClient,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<()> {
        if actor_id != user_id {
            Self::require_admin(db, conversation_id, actor_id).await?;
        }

        let client = db.get().await?;
        let affected = client
            .execute(
                "UPDATE conversation_participants SET left_at = NOW() \
                 WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL",
                &[&conversation_id, &user_id],
            )
            .await?;

        if affected == 0 {
            let exists = client
                .query_opt(
                    "SELECT 1 FROM conversation_participants \
                     WHERE conversation_id = $1 AND user_id = $2",
                    &[&conversation_id, &user_id],
                )
                .await?;
            if exists.is_none() {
                return Err(AppError::NotFound);
            }
            // Already left; removal is idempotent.
        }

        Self::invalidate_membership_cache(redis, conversation_id, user_id).await;
        Ok(())
    }

    async fn require_admin(db: &Pool, conversation_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                "SELECT role FROM conversation_participants \
                 WHERE conversation_id = $1 AND user_id = $2 AND left_at IS NULL",
                &[&conversation_id, &user_id],
            )
            .await?
            .ok_or(AppError::Forbidden)?;

        let role: String = row.get("role");
        if ParticipantRole::from_db(&role).map(|r| r.is_admin()) != Some(true) {
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    /// Active conversations for a user with computed unread counts, most
    /// recently active first. One of the two hot query paths.
    pub async fn list_for_user(db: &Pool, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let client = db.get().await?;
        let rows = client
            .query(
                "SELECT c.id, c.conversation_type, c.name, c.linked_content_id, c.created_by, \
                        c.created_at, c.last_message_at, c.is_archived, c.archived_at, \
                        cp.role, cp.is_muted, cp.last_read_at, \
                        (SELECT COUNT(*) FROM messages m \
                          WHERE m.conversation_id = c.id \
                            AND m.deleted_at IS NULL \
                            AND m.sender_id <> $1 \
                            AND m.created_at > COALESCE(cp.last_read_at, 'epoch'::timestamptz) \
                        ) AS unread_count \
                 FROM conversations c \
                 JOIN conversation_participants cp ON cp.conversation_id = c.id \
                 WHERE cp.user_id = $1 AND cp.left_at IS NULL AND NOT c.is_archived \
                 ORDER BY c.last_message_at DESC NULLS LAST, c.created_at DESC",
                &[&user_id],
            )
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let conversation = Self::conversation_from_row(row)?;
            let role_str: String = row.get("role");
            let role = ParticipantRole::from_db(&role_str)
                .ok_or_else(|| AppError::Storage(format!("unknown role: {role_str}")))?;
            summaries.push(ConversationSummary {
                conversation,
                role,
                is_muted: row.get("is_muted"),
                last_read_at: row.get("last_read_at"),
                unread_count: row.get("unread_count"),
            });
        }
        Ok(summaries)
    }

    /// Archive a conversation. Idempotent; frees the uniqueness key so a new
    /// direct/content-linked conversation can replace it.
    pub async fn archive(db: &Pool, conversation_id: Uuid, actor_id: Uuid) -> AppResult<()> {
        // Membership, not active membership: archiving twice must succeed,
        // and the first archive already deactivated the conversation.
        Self::get(db, conversation_id).await?;
        if !Self::was_participant(db, conversation_id, actor_id).await? {
            return Err(AppError::Forbidden);
        }

        let client = db.get().await?;
        client
            .execute(
                "UPDATE conversations SET is_archived = TRUE, archived_at = NOW() \
                 WHERE id = $1 AND NOT is_archived",
                &[&conversation_id],
            )
            .await?;
        Ok(())
    }

    pub async fn get(db: &Pool, conversation_id: Uuid) -> AppResult<Conversation> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1").as_str(),
                &[&conversation_id],
            )
            .await?
            .ok_or(AppError::NotFound)?;
        Self::conversation_from_row(&row)
    }

    /// Conversation details plus the full participant list, for the
    /// conversation screen. Past participants may still read.
    pub async fn get_with_participants(
        db: &Pool,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> AppResult<(Conversation, Vec<Participant>)> {
        if !Self::was_participant(db, conversation_id, requester_id).await? {
            return Err(AppError::Forbidden);
        }

        let conversation = Self::get(db, conversation_id).await?;

        let client = db.get().await?;
        let rows = client
            .query(
                "SELECT conversation_id, user_id, role, joined_at, left_at, last_read_at, is_muted \
                 FROM conversation_participants \
                 WHERE conversation_id = $1 \
                 ORDER BY joined_at ASC",
                &[&conversation_id],
            )
            .await?;

        let participants = rows
            .iter()
            .map(Self::participant_from_row)
            .collect::<AppResult<Vec<_>>>()?;

        Ok((conversation, participants))
    }

    /// Whether the user currently participates in an active (non-archived)
    /// conversation. Gate for sends, joins, and live delivery.
    pub async fn is_active_participant(
        db: &Pool,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<bool> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                "SELECT 1 \
                 FROM conversation_participants cp \
                 JOIN conversations c ON c.id = cp.conversation_id \
                 WHERE cp.conversation_id = $1 \
                   AND cp.user_id = $2 \
                   AND cp.left_at IS NULL \
                   AND NOT c.is_archived \
                 LIMIT 1",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(row.is_some())
    }

    /// Whether the user is or ever was a participant. Gate for history reads.
    pub async fn was_participant(
        db: &Pool,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<bool> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM conversation_participants \
                 WHERE conversation_id = $1 AND user_id = $2 LIMIT 1",
                &[&conversation_id, &user_id],
            )
            .await?;
        Ok(row.is_some())
    }

    /// Active-participant check with a short Redis cache in front, for the
    /// hot join/typing path. Invalidated whenever membership changes.
    pub async fn is_active_participant_cached(
        db: &Pool,
        redis: &crate::redis_client::RedisClient,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<bool> {
        use redis::AsyncCommands;

        let cache_key = format!("chat:participant:{conversation_id}:{user_id}");

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            if let Ok(Some(cached)) = conn.get::<_, Option<String>>(&cache_key).await {
                return Ok(cached == "1");
            }
        }

        let is_participant = Self::is_active_participant(db, conversation_id, user_id).await?;

        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let _: Result<(), _> = conn
                .set_ex(&cache_key, if is_participant { "1" } else { "0" }, 60)
                .await;
        }

        Ok(is_participant)
    }

    pub async fn invalidate_membership_cache(
        redis: &crate::redis_client::RedisClient,
        conversation_id: Uuid,
        user_id: Uuid,
    ) {
        use redis::AsyncCommands;

        let cache_key = format!("chat:participant:{conversation_id}:{user_id}");
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let _: Result<(), _> = conn.del(&cache_key).await;
        }
    }
}
