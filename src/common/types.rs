use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub type UserId = String;
pub type ConversationId = String;

/// Message identifier: either assigned by the data service or generated locally
/// for an optimistic entry that has not been confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageId {
    Server(String),
    Temporary(Uuid),
}

impl MessageId {
    pub fn is_temporary(&self) -> bool {
        matches!(self, MessageId::Temporary(_))
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        MessageId::Server(value)
    }
}

impl From<MessageId> for String {
    fn from(value: MessageId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Server(id) => f.write_str(id),
            MessageId::Temporary(id) => write!(f, "tmp-{id}"),
        }
    }
}

/// Which source a timeline entry came from. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Origin {
    #[default]
    History,
    Live,
    Optimistic,
}

/// Domain model for one chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id", alias = "id")]
    pub id: MessageId,
    #[serde(rename = "chat", alias = "chatId", alias = "conversationId")]
    pub conversation_id: ConversationId,
    #[serde(rename = "sender", deserialize_with = "sender_id")]
    pub sender_id: UserId,
    #[serde(rename = "text")]
    pub body: String,
    pub sent_at: DateTime<Utc>,
    /// Correlation id attached by the author's client to the durable write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
    #[serde(skip)]
    pub origin: Origin,
}

impl Message {
    /// Builds a locally authored entry shown before the data service confirms it.
    pub fn optimistic(
        conversation_id: ConversationId,
        sender_id: UserId,
        body: String,
        sent_at: DateTime<Utc>,
    ) -> Self {
        let temp_id = Uuid::new_v4();
        Self {
            id: MessageId::Temporary(temp_id),
            conversation_id,
            sender_id,
            body,
            sent_at,
            client_id: Some(temp_id),
            origin: Origin::Optimistic,
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

/// The sender arrives either as a bare id or as a populated user object.
#[derive(Deserialize)]
#[serde(untagged)]
enum SenderRef {
    Id(String),
    Object {
        #[serde(rename = "_id", alias = "id")]
        id: String,
    },
}

fn sender_id<'de, D>(deserializer: D) -> Result<UserId, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match SenderRef::deserialize(deserializer)? {
        SenderRef::Id(id) | SenderRef::Object { id } => id,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", alias = "id")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "avatar_ref")]
    pub avatar: Option<String>,
}

/// Avatars come back as `{ url }` objects or plain strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum AvatarRef {
    Url(String),
    Object { url: Option<String> },
}

fn avatar_ref<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<AvatarRef>::deserialize(deserializer)? {
            Some(AvatarRef::Url(url)) => Some(url),
            Some(AvatarRef::Object { url }) => url,
            None => None,
        },
    )
}

/// A conversation record as returned by the data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id", alias = "id")]
    pub id: ConversationId,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub is_group_chat: bool,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl Conversation {
    /// First participant that is not `me`.
    pub fn peer_of(&self, me: &str) -> Option<&User> {
        self.users.iter().find(|user| user.id != me)
    }
}

/// Identity of the conversation currently shown. Online state is derived
/// from presence when the view is built, never stored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSession {
    pub conversation_id: ConversationId,
    pub peer_id: UserId,
    pub peer_display_name: String,
    pub peer_avatar_ref: Option<String>,
}

impl ConversationSession {
    pub fn with_peer(conversation_id: ConversationId, peer: &User) -> Self {
        Self {
            conversation_id,
            peer_id: peer.id.clone(),
            peer_display_name: peer.name.clone(),
            peer_avatar_ref: peer.avatar.clone(),
        }
    }
}
