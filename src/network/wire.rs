//! Named events carried by the push channel.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`. Conversation-scoped
//! events carry the conversation id in the payload rather than in the name.

use serde::{Deserialize, Serialize};

use crate::common::{ConversationId, Message, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(alias = "chatId")]
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoPayload {
    #[serde(alias = "chatId")]
    pub conversation_id: ConversationId,
    pub message: Message,
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// Full presence snapshot.
    OnlineUsers(Vec<UserId>),
    UserTypingStart(TypingPayload),
    UserTypingStop(TypingPayload),
    /// Live message delivery.
    Chat(Message),
}

impl InboundEvent {
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            InboundEvent::OnlineUsers(_) => None,
            InboundEvent::UserTypingStart(payload) | InboundEvent::UserTypingStop(payload) => {
                Some(&payload.conversation_id)
            }
            InboundEvent::Chat(message) => Some(&message.conversation_id),
        }
    }
}

/// Frames this client pushes to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    AddUser(UserId),
    TypingStart(TypingPayload),
    TypingStop(TypingPayload),
    /// Fire-and-forget echo request after a durable write.
    SendMessage(EchoPayload),
}

pub fn decode_frame(line: &str) -> Result<InboundEvent, serde_json::Error> {
    serde_json::from_str(line)
}

pub fn encode_frame(event: &OutboundEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
