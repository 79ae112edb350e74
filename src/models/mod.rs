pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationType, Participant, ParticipantRole};
pub use message::{Message, MessageType, MessageView, ReactionCount, ReplyPreview};
