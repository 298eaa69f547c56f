use super::types::{Conversation, ConversationId, ConversationSession, Message, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Recoverable failure, shown as a toast.
    Transient,
    /// Credential missing or rejected; the identity collaborator should re-authenticate.
    AuthRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn transient(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Transient,
            text: text.into(),
        }
    }

    pub fn auth_required(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::AuthRequired,
            text: text.into(),
        }
    }
}

/// One-line status shown next to the peer name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    Loading,
    Typing,
    Online,
    Offline,
}

/// Read model of the active conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub session: ConversationSession,
    pub peer_online: bool,
    pub peer_is_typing: bool,
    /// History has not resolved yet; distinct from an empty conversation.
    pub is_loading: bool,
    pub messages: Vec<Message>,
}

impl ConversationView {
    pub fn status(&self) -> HeaderStatus {
        if self.is_loading {
            HeaderStatus::Loading
        } else if self.peer_is_typing {
            HeaderStatus::Typing
        } else if self.peer_online {
            HeaderStatus::Online
        } else {
            HeaderStatus::Offline
        }
    }

    pub fn is_empty_conversation(&self) -> bool {
        !self.is_loading && self.messages.is_empty()
    }
}

/// Events the sync engine sends up to the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The active conversation changed or its contents changed. `None` means idle.
    View(Option<ConversationView>),
    /// Timeline length or the peer typing flag changed.
    ScrollToLatest,
    PresenceChanged(Vec<String>),
    /// Text of a failed send, under the `retain` failure policy.
    RestoreDraft {
        conversation_id: ConversationId,
        text: String,
    },
    Users(Vec<User>),
    Conversations(Vec<Conversation>),
    Notice(Notice),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(is_loading: bool, typing: bool, online: bool) -> ConversationView {
        ConversationView {
            session: ConversationSession {
                conversation_id: "c1".into(),
                peer_id: "p".into(),
                peer_display_name: "Peer".into(),
                peer_avatar_ref: None,
            },
            peer_online: online,
            peer_is_typing: typing,
            is_loading,
            messages: Vec::new(),
        }
    }

    #[test]
    fn status_precedence() {
        assert_eq!(view(true, true, true).status(), HeaderStatus::Loading);
        assert_eq!(view(false, true, false).status(), HeaderStatus::Typing);
        assert_eq!(view(false, false, true).status(), HeaderStatus::Online);
        assert_eq!(view(false, false, false).status(), HeaderStatus::Offline);
    }

    #[test]
    fn loading_is_not_an_empty_conversation() {
        assert!(!view(true, false, false).is_empty_conversation());
        assert!(view(false, false, false).is_empty_conversation());
    }
}
