//! REST client over reqwest

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::dto::{ConversationDto, CreateConversationRequest, CreateMessageRequest, MessageDto};
use super::{ChatApi, RequestPolicy};
use crate::error::{SyncError, SyncResult};
use crate::models::{Conversation, ConversationId, Message, UserId};
use crate::session::CredentialSource;

/// `ChatApi` backed by the HTTP server
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpChatApi {
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialSource>,
        policy: &RequestPolicy,
    ) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Protocol(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the current bearer token
    fn authorize(&self, request: RequestBuilder) -> SyncResult<RequestBuilder> {
        let session = self
            .credentials
            .current()
            .ok_or_else(|| SyncError::Auth("no credential available".to_string()))?;
        Ok(request.bearer_auth(session.token()))
    }

    async fn execute<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> SyncResult<T> {
        let response = self
            .authorize(request)?
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        let response = check_status(what, response).await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("{}: invalid response body: {}", what, e)))
    }
}

/// Map a send failure (no HTTP status)
fn transport_error(what: &str, e: reqwest::Error) -> SyncError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SyncError::TransientNetwork(format!("{}: {}", what, e))
    } else {
        SyncError::Protocol(format!("{}: {}", what, e))
    }
}

/// Map a non-success status to the error taxonomy
pub(crate) fn status_error(what: &str, status: StatusCode, body: &str) -> SyncError {
    let detail = if body.is_empty() {
        format!("{}: {}", what, status)
    } else {
        format!("{}: {} ({})", what, status, body.trim())
    };

    match status.as_u16() {
        401 | 403 => SyncError::Auth(detail),
        404 => SyncError::NotFound(detail),
        408 | 429 | 500..=599 => SyncError::TransientNetwork(detail),
        _ => SyncError::Protocol(detail),
    }
}

async fn check_status(what: &str, response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(what, status, &body))
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_conversations(&self) -> SyncResult<Vec<Conversation>> {
        let request = self.client.get(self.url("/conversations"));
        let conversations: Vec<ConversationDto> =
            self.execute("fetch conversations", request).await?;
        debug!("Fetched {} conversations", conversations.len());
        Ok(conversations.into_iter().map(Conversation::from).collect())
    }

    async fn create_conversation(&self, participant: &UserId) -> SyncResult<Conversation> {
        let request = self
            .client
            .post(self.url("/conversations"))
            .json(&CreateConversationRequest {
                participant_id: participant.as_str(),
            });
        let conversation: ConversationDto = self.execute("create conversation", request).await?;
        Ok(conversation.into())
    }

    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        page: u32,
        limit: u32,
    ) -> SyncResult<Vec<Message>> {
        let request = self
            .client
            .get(self.url(&format!("/conversations/{}/messages", conversation_id)))
            .query(&[("page", page), ("limit", limit)]);
        let messages: Vec<MessageDto> = self.execute("fetch messages", request).await?;
        debug!(
            "Fetched {} messages for {} (page {})",
            messages.len(),
            conversation_id,
            page
        );
        Ok(messages.into_iter().map(Message::from).collect())
    }

    async fn create_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> SyncResult<Message> {
        let request = self
            .client
            .post(self.url(&format!("/conversations/{}/messages", conversation_id)))
            .json(&CreateMessageRequest { content });
        let message: MessageDto = self.execute("send message", request).await?;
        Ok(message.into())
    }
}
