//! Conversation index
//!
//! Conversations sorted by last activity, most recent first. Sorting is
//! stable so equal timestamps keep their previous relative order.

use super::messages::MessageEntry;
use crate::models::{Conversation, ConversationId, MessageKey, UserId};

#[derive(Debug, Default)]
pub struct ConversationIndex {
    conversations: Vec<Conversation>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by identity, then re-sort
    ///
    /// Returns true if the conversation was new.
    pub fn upsert(&mut self, conversation: Conversation) -> bool {
        let inserted = match self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            Some(existing) => {
                *existing = conversation;
                false
            }
            None => {
                self.conversations.push(conversation);
                true
            }
        };
        self.sort();
        inserted
    }

    /// Point a conversation at a newer message, then re-sort
    ///
    /// Older messages don't move the pointer back, except that a pointer to
    /// a still-pending local entry always yields to a confirmed one.
    /// Returns false if the conversation is unknown.
    pub fn touch(&mut self, conversation_id: &ConversationId, message: &MessageEntry) -> bool {
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| &c.id == conversation_id)
        else {
            return false;
        };

        let pointer_is_local = conversation
            .latest_message
            .as_ref()
            .is_some_and(|k| k.is_local());
        let supersedes_local = pointer_is_local && !message.key.is_local();

        if message.created_at >= conversation.last_activity || supersedes_local {
            conversation.latest_message = Some(message.key.clone());
            conversation.last_activity = message.created_at;
            self.sort();
        }
        true
    }

    /// Re-point a conversation whose latest entry was discarded
    ///
    /// No-op unless the pointer is `removed`. Falls back to `fallback`
    /// (the newest remaining entry), or to no pointer at all.
    pub fn rewind(
        &mut self,
        conversation_id: &ConversationId,
        removed: &MessageKey,
        fallback: Option<&MessageEntry>,
    ) {
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| &c.id == conversation_id)
        else {
            return;
        };
        if conversation.latest_message.as_ref() != Some(removed) {
            return;
        }

        conversation.latest_message = fallback.map(|m| m.key.clone());
        if let Some(entry) = fallback {
            conversation.last_activity = entry.created_at;
        }
        self.sort();
    }

    fn sort(&mut self) {
        self.conversations
            .sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.get(id).is_some()
    }

    /// The direct (non-group) conversation between two users, if any
    pub fn find_direct(&self, a: &UserId, b: &UserId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.is_direct_between(a, b))
    }

    /// Conversations, most recently active first
    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }
}
