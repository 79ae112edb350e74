//! Authorization guards that enforce permission checks at the type level.
//! Handlers take a [`User`] or verify a [`ConversationMember`] instead of
//! reading identity or membership ad hoc.

use deadpool_postgres::Pool;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::conversation::{ConversationType, ParticipantRole};
use actix_middleware::AuthContext;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};

/// The authenticated caller, resolved by the JWT middleware at the edge.
#[derive(Debug, Clone, Copy)]
pub struct User {
    pub id: Uuid,
    pub profile_id: Uuid,
}

impl FromRequest for User {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let ctx = req.extensions().get::<AuthContext>().copied();

        Box::pin(async move {
            let ctx = ctx.ok_or(AppError::Unauthorized)?;
            Ok(User {
                id: ctx.user_id,
                profile_id: ctx.profile_id,
            })
        })
    }
}

/// A verified conversation membership with all permission context, loaded in
/// one query.
#[derive(Debug, Clone)]
pub struct ConversationMember {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub role: ParticipantRole,
    pub conversation_type: ConversationType,
    pub is_muted: bool,
    pub has_left: bool,
    pub conversation_archived: bool,
}

impl ConversationMember {
    /// Load and verify membership. Fails with Forbidden when the user never
    /// participated; a left participant still verifies (read access to
    /// history) but cannot act.
    pub async fn verify(
        db: &Pool,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Self, AppError> {
        let client = db.get().await?;

        let row = client
            .query_opt(
                "SELECT cp.user_id, cp.conversation_id, cp.role, cp.is_muted, \
                        (cp.left_at IS NOT NULL) AS has_left, \
                        c.conversation_type, c.is_archived \
                 FROM conversation_participants cp \
                 JOIN conversations c ON c.id = cp.conversation_id \
                 WHERE cp.user_id = $1 AND cp.conversation_id = $2",
                &[&user_id, &conversation_id],
            )
            .await?
            .ok_or(AppError::Forbidden)?;

        let role_str: String = row.get("role");
        let role = ParticipantRole::from_db(&role_str)
            .ok_or_else(|| AppError::Storage("invalid role in database".into()))?;
        let type_str: String = row.get("conversation_type");
        let conversation_type = ConversationType::from_db(&type_str)
            .ok_or_else(|| AppError::Storage("invalid conversation type in database".into()))?;

        Ok(ConversationMember {
            user_id: row.get("user_id"),
            conversation_id: row.get("conversation_id"),
            role,
            conversation_type,
            is_muted: row.get("is_muted"),
            has_left: row.get("has_left"),
            conversation_archived: row.get("is_archived"),
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Active participant: has not left and the conversation is live.
    pub fn is_active(&self) -> bool {
        !self.has_left && !self.conversation_archived
    }

    pub fn can_send(&self) -> Result<(), AppError> {
        if !self.is_active() || self.is_muted {
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    pub fn can_delete_message(&self, is_own_message: bool) -> Result<(), AppError> {
        if is_own_message {
            return Ok(());
        }
        if !self.is_admin() {
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if !self.is_active() || !self.is_admin() {
            return Err(AppError::Forbidden);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(role: ParticipantRole, has_left: bool, archived: bool, muted: bool) -> ConversationMember {
        ConversationMember {
            user_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role,
            conversation_type: ConversationType::Group,
            is_muted: muted,
            has_left,
            conversation_archived: archived,
        }
    }

    #[test]
    fn test_active_member_can_send() {
        assert!(member(ParticipantRole::Member, false, false, false)
            .can_send()
            .is_ok());
    }

    #[test]
    fn test_left_member_cannot_send() {
        assert!(member(ParticipantRole::Member, true, false, false)
            .can_send()
            .is_err());
    }

    #[test]
    fn test_muted_member_cannot_send() {
        assert!(member(ParticipantRole::Member, false, false, true)
            .can_send()
            .is_err());
    }

    #[test]
    fn test_archived_conversation_blocks_send() {
        assert!(member(ParticipantRole::Admin, false, true, false)
            .can_send()
            .is_err());
    }

    #[test]
    fn test_member_cannot_delete_others_messages() {
        let m = member(ParticipantRole::Member, false, false, false);
        assert!(m.can_delete_message(false).is_err());
        assert!(m.can_delete_message(true).is_ok());
    }

    #[test]
    fn test_admin_can_delete_others_messages() {
        let m = member(ParticipantRole::Admin, false, false, false);
        assert!(m.can_delete_message(false).is_ok());
        assert!(m.can_delete_message(true).is_ok());
    }

    #[test]
    fn test_require_admin() {
        assert!(member(ParticipantRole::Admin, false, false, false)
            .require_admin()
            .is_ok());
        assert!(member(ParticipantRole::Member, false, false, false)
            .require_admin()
            .is_err());
        // A left admin no longer manages the conversation.
        assert!(member(ParticipantRole::Admin, true, false, false)
            .require_admin()
            .is_err());
    }
}
