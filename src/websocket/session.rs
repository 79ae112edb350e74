//! Per-connection WebSocket session actor.
//!
//! A connection reaches this actor only after handshake authentication
//! resolved its `(user_id, profile_id)` pair and the registry issued its
//! connection id. From there the session multiplexes any number of rooms:
//! inbound intents are parsed, dispatched to the services, and the stored
//! result is fanned out through the registry. Each intent is handled in
//! isolation; a failed operation answers the originating connection with an
//! error frame and never desynchronizes the read loop.

use crate::error::{AppError, AppResult};
use crate::models::message::{MessageView, ReplyPreview};
use crate::services::{retry_once, with_storage_timeout, ConversationService, MessageService};
use crate::state::AppState;
use crate::websocket::events::{broadcast_event, GatewayEvent};
use crate::websocket::message_types::{error_frame, ClientIntent};
use crate::websocket::normalize;
use crate::websocket::{ConnectionId, RoomRegistry};
use actix::{
    Actor, ActorContext, Addr, AsyncContext, Handler, Message as ActixMessage, StreamHandler,
};
use actix_middleware::AuthContext;
use actix_web_actors::ws;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// Payload delivered to this connection (broadcast fan-in or direct reply).
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Deliver(String);

pub struct WsSession {
    connection_id: ConnectionId,
    user_id: Uuid,
    #[allow(dead_code)]
    profile_id: Uuid,
    registry: RoomRegistry,
    state: AppState,
    hb: Instant,
    delivery: Option<UnboundedReceiver<String>>,
}

impl WsSession {
    pub fn new(
        connection_id: ConnectionId,
        auth: AuthContext,
        state: AppState,
        delivery: UnboundedReceiver<String>,
    ) -> Self {
        Self {
            connection_id,
            user_id: auth.user_id,
            profile_id: auth.profile_id,
            registry: state.registry.clone(),
            state,
            hb: Instant::now(),
            delivery: Some(delivery),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = Duration::from_secs(self.state.config.heartbeat_interval_secs);
        let timeout = Duration::from_secs(self.state.config.client_timeout_secs);

        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(
                    user_id = %act.user_id,
                    "heartbeat missed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, "websocket session started");

        self.heartbeat(ctx);

        // Pump registry deliveries into the actor mailbox. Ends when either
        // side goes away.
        if let Some(mut rx) = self.delivery.take() {
            let addr = ctx.address();
            actix::spawn(async move {
                while let Some(payload) = rx.recv().await {
                    if addr.try_send(Deliver(payload)).is_err() {
                        break;
                    }
                }
            });
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, "websocket session stopped");

        // Full cleanup: every room, the user map, the delivery channel.
        let registry = self.registry.clone();
        let connection_id = self.connection_id;
        actix::spawn(async move {
            registry.unregister(connection_id).await;
        });
    }
}

impl Handler<Deliver> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.hb = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientIntent>(&text) {
                Ok(intent) => {
                    let state = self.state.clone();
                    let addr = ctx.address();
                    let connection_id = self.connection_id;
                    let user_id = self.user_id;

                    actix::spawn(async move {
                        handle_intent(state, addr, connection_id, user_id, intent).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable client frame");
                    ctx.text(error_frame(
                        "unknown",
                        &AppError::Validation("unrecognized intent".into()),
                    ));
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("binary frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(?reason, "close frame received");
                ctx.stop();
            }
            _ => {}
        }
    }
}

async fn handle_intent(
    state: AppState,
    addr: Addr<WsSession>,
    connection_id: ConnectionId,
    user_id: Uuid,
    intent: ClientIntent,
) {
    let intent_name = intent.intent_name();
    if let Err(err) = dispatch_intent(&state, &addr, connection_id, user_id, intent).await {
        if matches!(err, AppError::Forbidden) {
            tracing::warn!(%user_id, intent = intent_name, "forbidden intent");
        }
        // Errors answer the originating connection only.
        addr.do_send(Deliver(error_frame(intent_name, &err)));
    }
}

async fn dispatch_intent(
    state: &AppState,
    addr: &Addr<WsSession>,
    connection_id: ConnectionId,
    user_id: Uuid,
    intent: ClientIntent,
) -> AppResult<()> {
    let registry = &state.registry;
    let db = &state.db;
    let timeout_ms = state.config.storage_timeout_ms;
    let no_exclusions: HashSet<ConnectionId> = HashSet::new();

    match intent {
        ClientIntent::Join { conversation_id } => {
            let allowed = retry_once(|| async {
                with_storage_timeout(
                    timeout_ms,
                    ConversationService::is_active_participant_cached(
                        db,
                        &state.redis,
                        conversation_id,
                        user_id,
                    ),
                )
                .await
            })
            .await?;
            if !allowed {
                return Err(AppError::Forbidden);
            }

            registry.join(connection_id, conversation_id).await;

            // Explicit acknowledgement; clients must not assume success.
            let ack = GatewayEvent::RoomJoined { conversation_id }
                .to_payload()
                .map_err(|e| AppError::Transport(e.to_string()))?;
            addr.do_send(Deliver(ack));
        }

        ClientIntent::Leave { conversation_id } => {
            registry.leave(connection_id, conversation_id).await;
            let ack = GatewayEvent::RoomLeft { conversation_id }
                .to_payload()
                .map_err(|e| AppError::Transport(e.to_string()))?;
            addr.do_send(Deliver(ack));
        }

        ClientIntent::TypingStart { conversation_id } => {
            // Join already verified membership for this connection.
            if !registry.is_joined(connection_id, conversation_id).await {
                return Err(AppError::Forbidden);
            }

            registry
                .set_typing(
                    conversation_id,
                    user_id,
                    Duration::from_secs(state.config.typing_ttl_secs),
                )
                .await;

            let exclude = registry.connections_of(user_id).await;
            broadcast_event(
                registry,
                conversation_id,
                &GatewayEvent::TypingStart {
                    conversation_id,
                    user_id,
                },
                &exclude,
            )
            .await?;
        }

        ClientIntent::TypingStop { conversation_id } => {
            if registry.clear_typing(conversation_id, user_id).await {
                let exclude = registry.connections_of(user_id).await;
                broadcast_event(
                    registry,
                    conversation_id,
                    &GatewayEvent::TypingStop {
                        conversation_id,
                        user_id,
                    },
                    &exclude,
                )
                .await?;
            }
        }

        ClientIntent::Send {
            conversation_id,
            fields,
        } => {
            let new = normalize::normalize_send(&fields)?;

            // Persist first; broadcast only what the database committed.
            let message = retry_once(|| async {
                with_storage_timeout(
                    timeout_ms,
                    MessageService::send(db, conversation_id, user_id, new.clone()),
                )
                .await
            })
            .await?;

            let reply_to = match message.reply_to_id {
                Some(reply_id) => MessageService::get(db, reply_id)
                    .await
                    .ok()
                    .map(|t| ReplyPreview::new(t.id, t.sender_id, t.content, t.deleted_at)),
                None => None,
            };
            let view = MessageView::from_row(message, reply_to, Vec::new());

            // Full room fan-out, the sender's own connections included, so
            // multi-tab echo stays consistent.
            broadcast_event(
                registry,
                conversation_id,
                &GatewayEvent::MessageNew { message: view },
                &no_exclusions,
            )
            .await?;

            registry.clear_typing(conversation_id, user_id).await;
        }

        ClientIntent::Edit {
            message_id,
            content,
        } => {
            let message = retry_once(|| async {
                with_storage_timeout(timeout_ms, MessageService::edit(db, message_id, user_id, &content))
                    .await
            })
            .await?;

            broadcast_event(
                registry,
                message.conversation_id,
                &GatewayEvent::MessageEdited {
                    conversation_id: message.conversation_id,
                    message_id: message.id,
                    content: message.content.clone(),
                    edited_at: message.edited_at.unwrap_or(message.created_at),
                },
                &no_exclusions,
            )
            .await?;
        }

        ClientIntent::Delete { message_id } => {
            let message = retry_once(|| async {
                with_storage_timeout(timeout_ms, MessageService::soft_delete(db, message_id, user_id))
                    .await
            })
            .await?;

            broadcast_event(
                registry,
                message.conversation_id,
                &GatewayEvent::MessageDeleted {
                    conversation_id: message.conversation_id,
                    message_id: message.id,
                },
                &no_exclusions,
            )
            .await?;
        }

        ClientIntent::React { message_id, emoji } => {
            let (conversation_id, _) = retry_once(|| async {
                with_storage_timeout(timeout_ms, MessageService::react(db, message_id, user_id, &emoji))
                    .await
            })
            .await?;

            broadcast_event(
                registry,
                conversation_id,
                &GatewayEvent::ReactionUpdated {
                    conversation_id,
                    message_id,
                    user_id,
                    emoji,
                    added: true,
                },
                &no_exclusions,
            )
            .await?;
        }

        ClientIntent::Unreact { message_id, emoji } => {
            let (conversation_id, _) = retry_once(|| async {
                with_storage_timeout(
                    timeout_ms,
                    MessageService::unreact(db, message_id, user_id, &emoji),
                )
                .await
            })
            .await?;

            broadcast_event(
                registry,
                conversation_id,
                &GatewayEvent::ReactionUpdated {
                    conversation_id,
                    message_id,
                    user_id,
                    emoji,
                    added: false,
                },
                &no_exclusions,
            )
            .await?;
        }

        ClientIntent::MarkRead {
            conversation_id,
            upto_message_id,
        } => {
            let read_at = retry_once(|| async {
                with_storage_timeout(
                    timeout_ms,
                    MessageService::mark_read(db, conversation_id, user_id, upto_message_id),
                )
                .await
            })
            .await?;

            broadcast_event(
                registry,
                conversation_id,
                &GatewayEvent::ReadReceipt {
                    conversation_id,
                    user_id,
                    upto_message_id,
                    read_at,
                },
                &no_exclusions,
            )
            .await?;
        }
    }

    Ok(())
}
