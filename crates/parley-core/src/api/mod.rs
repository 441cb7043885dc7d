//! REST collaborator
//!
//! `ChatApi` is the seam the coordinator talks through; `HttpChatApi` is
//! the reqwest implementation. Every call reads the credential at call
//! time so a logout or token refresh takes effect immediately.

pub mod dto;
mod http;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::SyncResult;
use crate::models::{Conversation, ConversationId, Message, UserId};
use crate::sync::backoff::Backoff;

pub use http::HttpChatApi;

/// Server operations
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Every conversation the local user participates in
    async fn fetch_conversations(&self) -> SyncResult<Vec<Conversation>>;

    /// Create the conversation with `participant`, or return the existing one
    async fn create_conversation(&self, participant: &UserId) -> SyncResult<Conversation>;

    /// One page of messages in chronological order
    ///
    /// Page 1 holds the newest `limit` messages, page 2 the ones before
    /// them, and so on.
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        page: u32,
        limit: u32,
    ) -> SyncResult<Vec<Message>>;

    /// Persist a message; returns the server-confirmed copy
    async fn create_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> SyncResult<Message>;
}

/// Timeout and retry settings for REST calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Total tries, including the first
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Run `op`, retrying transient failures with backoff
///
/// Only for idempotent calls. Non-retryable errors return immediately.
pub async fn with_retry<T, F, Fut>(policy: &RequestPolicy, what: &str, mut op: F) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut backoff = Backoff::new(policy.base_delay, policy.max_delay);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && backoff.attempt() + 1 < policy.attempts => {
                let delay = backoff.next_delay();
                warn!("{} failed: {} (retrying in {:?})", what, e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
