//! Message REST surface: paginated history, send, edit, delete, forward,
//! and read receipts. Writes broadcast the same events as the WebSocket
//! path so REST-only clients stay consistent with live ones.

use crate::{
    error::AppError,
    middleware::guards::User,
    models::message::{MessageType, MessageView, ReplyPreview},
    services::{
        message_service::{HistoryCursor, NewMessage},
        retry_once, MessageService,
    },
    state::AppState,
    websocket::events::{broadcast_event, GatewayEvent},
};
use actix_web::{delete, get, patch, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub message_type: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub media_url: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Option<JsonValue>,
    pub encryption_key_ref: Option<String>,
}

impl SendMessageRequest {
    fn into_new_message(self) -> Result<NewMessage, AppError> {
        let message_type = match self.message_type.as_deref() {
            Some(raw) => MessageType::from_db(&raw.to_lowercase())
                .ok_or_else(|| AppError::Validation(format!("unknown message type: {raw}")))?,
            None => MessageType::Text,
        };
        Ok(NewMessage {
            content: self.content.unwrap_or_default(),
            message_type,
            reply_to_id: self.reply_to_id,
            media_url: self.media_url,
            metadata: self.metadata,
            encryption_key_ref: self.encryption_key_ref,
        })
    }
}

async fn broadcast_new_message(
    state: &AppState,
    message: crate::models::message::Message,
) -> Result<MessageView, AppError> {
    let reply_to = match message.reply_to_id {
        Some(reply_id) => MessageService::get(&state.db, reply_id)
            .await
            .ok()
            .map(|t| ReplyPreview::new(t.id, t.sender_id, t.content, t.deleted_at)),
        None => None,
    };
    let conversation_id = message.conversation_id;
    let view = MessageView::from_row(message, reply_to, Vec::new());

    broadcast_event(
        &state.registry,
        conversation_id,
        &GatewayEvent::MessageNew {
            message: view.clone(),
        },
        &HashSet::new(),
    )
    .await?;

    Ok(view)
}

/// POST /conversations/{id}/messages
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    let new = body.into_inner().into_new_message()?;

    let message = retry_once(|| async {
        MessageService::send(&state.db, conversation_id, user.id, new.clone()).await
    })
    .await?;

    let view = broadcast_new_message(&state, message).await?;
    Ok(HttpResponse::Created().json(view))
}

#[derive(Deserialize, ToSchema)]
pub struct HistoryQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// GET /conversations/{id}/messages
/// Newest-first keyset pagination; deleted messages arrive redacted.
#[get("/conversations/{id}/messages")]
pub async fn get_history(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let cursor = query
        .cursor
        .as_deref()
        .map(HistoryCursor::decode)
        .transpose()?;
    let limit = query
        .limit
        .unwrap_or(state.config.history_page_size)
        .clamp(1, state.config.history_page_size_max);

    let page = MessageService::list_history(
        &state.db,
        conversation_id.into_inner(),
        user.id,
        cursor,
        limit,
    )
    .await?;

    Ok(HttpResponse::Ok().json(page))
}

#[derive(Deserialize, ToSchema)]
pub struct EditMessageRequest {
    pub content: String,
}

/// PATCH /messages/{id}
/// Sender-only; deleted messages cannot be edited.
#[patch("/messages/{id}")]
pub async fn edit_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    body: web::Json<EditMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message =
        MessageService::edit(&state.db, message_id.into_inner(), user.id, &body.content).await?;

    broadcast_event(
        &state.registry,
        message.conversation_id,
        &GatewayEvent::MessageEdited {
            conversation_id: message.conversation_id,
            message_id: message.id,
            content: message.content.clone(),
            edited_at: message.edited_at.unwrap_or(message.created_at),
        },
        &HashSet::new(),
    )
    .await?;

    let view = MessageView::from_row(message, None, Vec::new());
    Ok(HttpResponse::Ok().json(view))
}

/// DELETE /messages/{id}
/// Soft delete; the row survives and renders redacted everywhere.
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let message = MessageService::soft_delete(&state.db, message_id.into_inner(), user.id).await?;

    broadcast_event(
        &state.registry,
        message.conversation_id,
        &GatewayEvent::MessageDeleted {
            conversation_id: message.conversation_id,
            message_id: message.id,
        },
        &HashSet::new(),
    )
    .await?;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize, ToSchema)]
pub struct ForwardMessageRequest {
    pub target_conversation_id: Uuid,
}

/// POST /messages/{id}/forward
/// Copies the message into the target conversation with a forward marker;
/// the copy is independent of the source from then on.
#[post("/messages/{id}/forward")]
pub async fn forward_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    body: web::Json<ForwardMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message = MessageService::forward(
        &state.db,
        message_id.into_inner(),
        body.target_conversation_id,
        user.id,
    )
    .await?;

    let view = broadcast_new_message(&state, message).await?;
    Ok(HttpResponse::Created().json(view))
}

#[derive(Deserialize, ToSchema)]
pub struct MarkReadRequest {
    pub upto_message_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct MarkReadResponse {
    pub read_at: chrono::DateTime<chrono::Utc>,
}

/// POST /conversations/{id}/read
/// Idempotent under replay.
#[post("/conversations/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<MarkReadRequest>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    let upto_message_id = body.upto_message_id;

    let read_at = retry_once(|| async {
        MessageService::mark_read(&state.db, conversation_id, user.id, upto_message_id).await
    })
    .await?;

    broadcast_event(
        &state.registry,
        conversation_id,
        &GatewayEvent::ReadReceipt {
            conversation_id,
            user_id: user.id,
            upto_message_id,
            read_at,
        },
        &HashSet::new(),
    )
    .await?;

    Ok(HttpResponse::Ok().json(MarkReadResponse { read_at }))
}
