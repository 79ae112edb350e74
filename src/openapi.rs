use utoipa::OpenApi;

use crate::models::conversation::{Conversation, ConversationType, Participant, ParticipantRole};
use crate::models::message::{MessageType, MessageView, ReactionCount, ReplyPreview};
use crate::routes::conversations::{
    AddParticipantRequest, CreateContentLinkedRequest, CreateDirectRequest, CreateGroupRequest,
};
use crate::routes::messages::{
    EditMessageRequest, ForwardMessageRequest, MarkReadRequest, MarkReadResponse,
    SendMessageRequest,
};
use crate::routes::reactions::AddReactionRequest;
use crate::services::conversation_service::ConversationSummary;
use crate::services::message_service::HistoryPage;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "alumni-chat-service",
        description = "Real-time messaging core: conversations, messages, reactions, read receipts, live delivery"
    ),
    components(schemas(
        Conversation,
        ConversationType,
        Participant,
        ParticipantRole,
        ConversationSummary,
        MessageType,
        MessageView,
        ReplyPreview,
        ReactionCount,
        HistoryPage,
        CreateDirectRequest,
        CreateContentLinkedRequest,
        CreateGroupRequest,
        AddParticipantRequest,
        SendMessageRequest,
        EditMessageRequest,
        ForwardMessageRequest,
        MarkReadRequest,
        MarkReadResponse,
        AddReactionRequest,
    ))
)]
pub struct ApiDoc;
