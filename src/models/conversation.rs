//! Conversation and participant rows.
//!
//! A conversation is never physically deleted; archiving sets `is_archived`
//! and frees the uniqueness key so a replacement can be created. Participants
//! are soft-removed via `left_at` so historical message attribution survives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Conversation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    /// 1:1 conversation; exactly one active instance per user pair
    Direct,
    /// Named multi-member conversation
    Group,
    /// Discussion thread rooted in an external posting
    ContentLinked,
}

impl ConversationType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            "content_linked" => Some(Self::ContentLinked),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::ContentLinked => "content_linked",
        }
    }
}

impl fmt::Display for ConversationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

/// Participant role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Can manage membership and delete others' messages
    Admin,
    /// Can send messages
    Member,
}

impl ParticipantRole {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

/// Conversation row
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Conversation {
    pub id: Uuid,
    pub conversation_type: ConversationType,
    /// Group conversations only
    pub name: Option<String>,
    /// Content-linked conversations only; opaque reference owned by the
    /// posting service
    pub linked_content_id: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    /// Denormalized; bumped on every accepted message
    pub last_message_at: Option<DateTime<Utc>>,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
}

/// Participant (membership) row
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    /// Non-null once the user left; such rows receive no live events and
    /// are excluded from unread counts
    pub left_at: Option<DateTime<Utc>>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub is_muted: bool,
}

/// Derived uniqueness key for an active direct conversation: the unordered
/// user pair in lexicographic order. A partial unique index on this key
/// (active rows only) is the serialization point for concurrent creation.
pub fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(direct_key(a, b), direct_key(b, a));
    }

    #[test]
    fn test_direct_key_distinguishes_pairs() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert_ne!(direct_key(a, b), direct_key(a, c));
    }

    #[test]
    fn test_conversation_type_db_round_trip() {
        for ty in [
            ConversationType::Direct,
            ConversationType::Group,
            ConversationType::ContentLinked,
        ] {
            assert_eq!(ConversationType::from_db(ty.to_db()), Some(ty));
        }
        assert_eq!(ConversationType::from_db("channel"), None);
    }

    #[test]
    fn test_role_db_round_trip() {
        assert_eq!(
            ParticipantRole::from_db("admin"),
            Some(ParticipantRole::Admin)
        );
        assert_eq!(
            ParticipantRole::from_db("member"),
            Some(ParticipantRole::Member)
        );
        assert_eq!(ParticipantRole::from_db("owner"), None);
        assert!(ParticipantRole::Admin.is_admin());
        assert!(!ParticipantRole::Member.is_admin());
    }
}
