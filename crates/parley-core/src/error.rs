//! Error handling
//!
//! Every component reports failures with `SyncError`. Connection-level
//! failures are surfaced as state by the coordinator; per-action failures
//! are returned to the caller.

use thiserror::Error;

use crate::models::{ConversationId, TempId};

/// Errors that can occur while talking to the server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Missing or rejected credential; ends the sync session
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A request or connection failed in a way that may succeed later
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// The push channel stayed unreachable after the configured attempts
    #[error("Push channel unreachable after {attempts} attempts")]
    ConnectionExhausted { attempts: u32 },

    /// The server does not know the requested resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server answered with something we could not understand
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Check if retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }

    /// Check if this error ends the sync session
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::Auth(_) => {
                Some("Sign in again: set a valid token with `parley config set token <token>`.")
            }
            SyncError::TransientNetwork(_) => Some("Check your network connection and try again."),
            SyncError::ConnectionExhausted { .. } => {
                Some("The live connection gave up. Reconnect manually once the server is reachable.")
            }
            _ => None,
        }
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// A message send that did not reach the server
///
/// Carries the original text so the caller can offer a resubmit.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Failed to send message to {conversation_id}: {source}")]
pub struct SendFailure {
    pub temp_id: Option<TempId>,
    pub conversation_id: ConversationId,
    pub content: String,
    #[source]
    pub source: SyncError,
}
