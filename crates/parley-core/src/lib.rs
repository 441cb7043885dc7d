//! Parley Core Library
//!
//! This crate provides the synchronization core for Parley, a two-party
//! chat client that keeps a local view of conversations and messages
//! consistent with a remote server.
//!
//! # Architecture
//!
//! The server is reached over two channels:
//!
//! - **REST** (`api`): fetch/create conversations and messages
//! - **Push channel** (`sync`): a WebSocket event stream that may drop and
//!   reconnect at any time
//!
//! The `SyncCoordinator` owns the local state (`MessageStore`,
//! `ConversationIndex`, `TypingTracker`), applies optimistic writes, and
//! reconciles them with server-confirmed state.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let coordinator = SyncCoordinator::from_config(&config)?;
//! coordinator.start().await?;
//!
//! for conversation in coordinator.conversations() {
//!     println!("{}", conversation.id);
//! }
//! ```
//!
//! # Modules
//!
//! - `config`: Application configuration
//! - `error`: Error taxonomy shared by every component
//! - `models`: Conversations, messages, and identifiers
//! - `session`: Credentials and the local user's identity
//! - `api`: REST collaborator
//! - `sync`: Connection lifecycle, event dispatch, and the coordinator
//! - `store`: Message log and conversation index
//! - `typing`: Ephemeral typing indicators

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod store;
pub mod sync;
pub mod typing;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ChatApi, HttpChatApi, RequestPolicy};
pub use config::Config;
pub use error::{SendFailure, SyncError, SyncResult};
pub use models::{
    Conversation, ConversationId, DeliveryState, Message, MessageId, MessageKey,
    OptimisticMessage, TempId, UserId,
};
pub use session::{CredentialSource, Session, StaticCredentials};
pub use store::{AppendOutcome, ConversationIndex, EntryState, MessageEntry, MessageStore};
pub use sync::{
    ConnectionManager, ConnectionState, ConnectionStatus, EventDispatcher, EventName, Halt,
    InboundEvent, OutboundEvent, ReconnectPolicy, SyncCoordinator, SyncState, SyncUpdate,
    WsConnector,
};
pub use typing::{TypingSignal, TypingTracker};
