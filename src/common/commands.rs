use super::types::{ConversationSession, User};

/// Commands the view layer sends down to the sync engine.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Select a peer: create-or-get the conversation, then open it.
    OpenPeer(User),
    /// Open an already known conversation.
    OpenConversation(ConversationSession),
    CloseConversation,
    /// A keystroke in the compose box.
    Input,
    /// The compose box lost focus.
    Blur,
    Send(String),
    RefreshUsers,
    RefreshConversations,
}
