//! Conversation REST surface: creation, listing with unread counts,
//! archival, and participant management.

use crate::{
    error::AppError,
    middleware::guards::User,
    models::conversation::{Conversation, Participant},
    services::ConversationService,
    state::AppState,
};
use actix_web::{delete, get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct CreateDirectRequest {
    pub recipient_id: Uuid,
}

/// POST /conversations/direct
/// Find or create the direct conversation with another user.
#[post("/conversations/direct")]
pub async fn create_direct(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateDirectRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation =
        ConversationService::get_or_create_direct(&state.db, user.id, body.recipient_id).await?;
    Ok(HttpResponse::Ok().json(conversation))
}

#[derive(Deserialize, ToSchema)]
pub struct CreateContentLinkedRequest {
    pub content_id: String,
}

/// POST /conversations/content
/// Find or create the discussion thread rooted in a posting. The content id
/// is opaque here; access to the posting itself is enforced upstream.
#[post("/conversations/content")]
pub async fn create_content_linked(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateContentLinkedRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation =
        ConversationService::get_or_create_content_linked(&state.db, &body.content_id, user.id)
            .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

#[derive(Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Uuid>,
}

/// POST /conversations/group
#[post("/conversations/group")]
pub async fn create_group(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation = ConversationService::create_group(
        &state.db,
        user.id,
        &body.name,
        &body.member_ids,
        state.config.max_group_members,
    )
    .await?;
    Ok(HttpResponse::Created().json(conversation))
}

/// GET /conversations
/// Active conversations for the caller with unread counts, most recently
/// active first.
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let summaries = ConversationService::list_for_user(&state.db, user.id).await?;
    Ok(HttpResponse::Ok().json(summaries))
}

#[derive(Serialize, ToSchema)]
pub struct ConversationDetailResponse {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
}

/// GET /conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let (conversation, participants) = ConversationService::get_with_participants(
        &state.db,
        conversation_id.into_inner(),
        user.id,
    )
    .await?;
    Ok(HttpResponse::Ok().json(ConversationDetailResponse {
        conversation,
        participants,
    }))
}

/// POST /conversations/{id}/archive
/// Idempotent; frees the direct/content-linked uniqueness key.
#[post("/conversations/{id}/archive")]
pub async fn archive_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    ConversationService::archive(&state.db, conversation_id.into_inner(), user.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize, ToSchema)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
}

/// POST /conversations/{id}/participants
/// Admin-only.
#[post("/conversations/{id}/participants")]
pub async fn add_participant(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<AddParticipantRequest>,
) -> Result<HttpResponse, AppError> {
    ConversationService::add_participant(
        &state.db,
        &state.redis,
        conversation_id.into_inner(),
        user.id,
        body.user_id,
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /conversations/{id}/participants/{user_id}
/// Admin-only, except that anyone may remove themselves. Sets `left_at`;
/// message history keeps its attribution.
#[delete("/conversations/{id}/participants/{user_id}")]
pub async fn remove_participant(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, target_user_id) = path.into_inner();
    ConversationService::remove_participant(
        &state.db,
        &state.redis,
        conversation_id,
        user.id,
        target_user_id,
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}
