//! Local state
//!
//! - `MessageStore`: per-conversation message log with optimistic entries
//! - `ConversationIndex`: conversations ordered by recent activity

mod conversations;
mod messages;

pub use conversations::ConversationIndex;
pub use messages::{EntryState, MessageEntry, MessageStore, PromoteOutcome};

/// Result of inserting into a store
///
/// A duplicate is not an error: the insert is simply skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    ConflictIgnored,
}
