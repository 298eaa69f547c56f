use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{Conversation, ConversationId, Message, User, UserId};
use crate::error::ApiError;

/// Supplies the bearer credential. Implemented by the identity collaborator.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Reads `CHAT_AUTH_TOKEN` on every request so a refreshed token is picked up.
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn bearer_token(&self) -> Option<String> {
        std::env::var("CHAT_AUTH_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty())
    }
}

pub struct StaticCredentials(pub Option<String>);

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub users: Vec<UserId>,
    pub is_group_chat: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

impl NewConversation {
    pub fn direct(peer_id: UserId) -> Self {
        Self {
            users: vec![peer_id],
            is_group_chat: false,
            group_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub text: String,
    /// Echoed back on the live copy so the author can retire its optimistic entry.
    pub client_id: Uuid,
}

/// The request/response data service.
pub trait ChatApi: Send + Sync {
    fn create_conversation(
        &self,
        request: NewConversation,
    ) -> BoxFuture<'_, Result<Conversation, ApiError>>;

    /// Durable write; returns the canonical message, or `None` when the
    /// write was accepted but the stored copy could not be read back.
    fn send_message(
        &self,
        conversation_id: ConversationId,
        message: OutgoingMessage,
    ) -> BoxFuture<'_, Result<Option<Message>, ApiError>>;

    fn fetch_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, Result<Vec<Message>, ApiError>>;

    fn fetch_users(&self) -> BoxFuture<'_, Result<Vec<User>, ApiError>>;

    fn fetch_conversations(&self) -> BoxFuture<'_, Result<Vec<Conversation>, ApiError>>;
}

/// History is returned either as a bare array or wrapped in `{ messages }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    List(Vec<Message>),
    Wrapped { messages: Vec<Message> },
}

/// The stored message, bare or wrapped in `{ message }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SentBody {
    Bare(Message),
    Wrapped { message: Message },
}

/// A 2xx answer means the write is durable whatever the body looks like.
fn stored_message(body: &str) -> Option<Message> {
    match serde_json::from_str::<SentBody>(body) {
        Ok(SentBody::Bare(message) | SentBody::Wrapped { message }) => Some(message),
        Err(err) => {
            log::warn!("Send accepted but the stored message is unreadable: {err}");
            None
        }
    }
}

impl From<HistoryBody> for Vec<Message> {
    fn from(body: HistoryBody) -> Self {
        match body {
            HistoryBody::List(messages) | HistoryBody::Wrapped { messages } => messages,
        }
    }
}

pub struct HttpChatApi {
    client: Client,
    base_url: String,
    credentials: Box<dyn CredentialProvider>,
}

impl HttpChatApi {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Box<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self.credentials.bearer_token().ok_or(ApiError::Unauthorized)?;
        Ok(request.bearer_auth(token))
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.authorized(request)?.send().await?;
        let body = checked(response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

async fn checked(response: Response) -> Result<String, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Unauthorized);
    }
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

impl ChatApi for HttpChatApi {
    fn create_conversation(
        &self,
        request: NewConversation,
    ) -> BoxFuture<'_, Result<Conversation, ApiError>> {
        Box::pin(async move {
            let builder = self.client.post(self.url("/chats/")).json(&request);
            self.execute(builder).await
        })
    }

    fn send_message(
        &self,
        conversation_id: ConversationId,
        message: OutgoingMessage,
    ) -> BoxFuture<'_, Result<Option<Message>, ApiError>> {
        Box::pin(async move {
            let url = self.url(&format!("/chats/{conversation_id}/message"));
            let request = self.authorized(self.client.post(url).json(&message))?;
            let body = checked(request.send().await?).await?;
            Ok(stored_message(&body))
        })
    }

    fn fetch_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, Result<Vec<Message>, ApiError>> {
        Box::pin(async move {
            let url = self.url(&format!("/chats/{conversation_id}/messages"));
            let body: HistoryBody = self.execute(self.client.get(url)).await?;
            Ok(body.into())
        })
    }

    fn fetch_users(&self) -> BoxFuture<'_, Result<Vec<User>, ApiError>> {
        Box::pin(async move { self.execute(self.client.get(self.url("/auth/users"))).await })
    }

    fn fetch_conversations(&self) -> BoxFuture<'_, Result<Vec<Conversation>, ApiError>> {
        Box::pin(async move { self.execute(self.client.get(self.url("/chats/"))).await })
    }
}
