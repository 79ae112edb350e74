//! Reaction REST surface. Reactions are unique per (message, user, emoji);
//! both add and remove are idempotent.

use crate::{
    error::AppError,
    middleware::guards::User,
    services::MessageService,
    state::AppState,
    websocket::events::{broadcast_event, GatewayEvent},
};
use actix_web::{delete, post, web, HttpResponse};
use serde::Deserialize;
use std::collections::HashSet;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct AddReactionRequest {
    pub emoji: String,
}

/// POST /messages/{id}/reactions
#[post("/messages/{id}/reactions")]
pub async fn add_reaction(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    body: web::Json<AddReactionRequest>,
) -> Result<HttpResponse, AppError> {
    let message_id = message_id.into_inner();
    let (conversation_id, _) =
        MessageService::react(&state.db, message_id, user.id, &body.emoji).await?;

    broadcast_event(
        &state.registry,
        conversation_id,
        &GatewayEvent::ReactionUpdated {
            conversation_id,
            message_id,
            user_id: user.id,
            emoji: body.emoji.clone(),
            added: true,
        },
        &HashSet::new(),
    )
    .await?;

    Ok(HttpResponse::Created().finish())
}

/// DELETE /messages/{id}/reactions/{emoji}
#[delete("/messages/{id}/reactions/{emoji}")]
pub async fn remove_reaction(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, String)>,
) -> Result<HttpResponse, AppError> {
    let (message_id, emoji) = path.into_inner();
    let (conversation_id, _) =
        MessageService::unreact(&state.db, message_id, user.id, &emoji).await?;

    broadcast_event(
        &state.registry,
        conversation_id,
        &GatewayEvent::ReactionUpdated {
            conversation_id,
            message_id,
            user_id: user.id,
            emoji,
            added: false,
        },
        &HashSet::new(),
    )
    .await?;

    Ok(HttpResponse::NoContent().finish())
}
