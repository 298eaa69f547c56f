pub mod commands;
pub mod events;
pub mod types;

pub use commands::ClientCommand;
pub use events::{ClientEvent, ConversationView, HeaderStatus, Notice, NoticeKind};
pub use types::{
    Conversation, ConversationId, ConversationSession, Message, MessageId, Origin, User, UserId,
};
