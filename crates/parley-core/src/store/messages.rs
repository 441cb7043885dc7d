//! Message log
//!
//! Entries live in an arena keyed by `MessageKey`; each conversation keeps
//! the keys in arrival order. Promotion swaps the key in place, so an
//! optimistic entry keeps its slot when the server confirms it.
//!
//! Readers never see arrival order: `messages()` sorts by creation
//! timestamp with ties broken by identity string.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppendOutcome;
use crate::models::{
    ConversationId, DeliveryState, Message, MessageKey, OptimisticMessage, TempId, UserId,
};

/// Lifecycle of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Sent by us, waiting for the server
    Pending,
    /// Known to the server
    Confirmed,
    /// The server never acknowledged it
    Failed,
}

/// One message as the client currently knows it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEntry {
    pub key: MessageKey,
    pub conversation_id: ConversationId,
    pub sender: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub state: EntryState,
    /// Delivery progress (confirmed entries only)
    pub delivery: Option<DeliveryState>,
}

impl MessageEntry {
    fn confirmed(conversation_id: ConversationId, message: Message) -> Self {
        Self {
            key: MessageKey::Server(message.id),
            conversation_id,
            sender: message.sender,
            body: message.body,
            created_at: message.created_at,
            state: EntryState::Confirmed,
            delivery: Some(message.delivery),
        }
    }

    fn pending(conversation_id: ConversationId, message: OptimisticMessage) -> Self {
        Self {
            key: MessageKey::Local(message.temp_id),
            conversation_id,
            sender: message.sender,
            body: message.body,
            created_at: message.created_at,
            state: EntryState::Pending,
            delivery: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == EntryState::Pending
    }

    /// Read order: creation timestamp, then identity string
    pub fn read_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.key.as_str().cmp(other.key.as_str()))
    }
}

/// How a `promote` call was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// The optimistic entry was replaced in place
    Promoted,
    /// No optimistic entry existed; the message was appended
    Appended,
    /// The confirmed message was already present; the shadow was dropped
    Merged,
    /// No optimistic entry existed and the message was already known
    AlreadyKnown,
}

/// Per-conversation message log
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: HashMap<MessageKey, MessageEntry>,
    logs: HashMap<ConversationId, Vec<MessageKey>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a confirmed message; identity is the only dedup key
    pub fn append(&mut self, conversation_id: &ConversationId, message: Message) -> AppendOutcome {
        let key = MessageKey::Server(message.id.clone());
        if self.entries.contains_key(&key) {
            return AppendOutcome::ConflictIgnored;
        }

        self.logs
            .entry(conversation_id.clone())
            .or_default()
            .push(key.clone());
        self.entries
            .insert(key, MessageEntry::confirmed(conversation_id.clone(), message));
        AppendOutcome::Inserted
    }

    /// Insert a client shadow entry
    pub fn append_optimistic(
        &mut self,
        conversation_id: &ConversationId,
        message: OptimisticMessage,
    ) -> AppendOutcome {
        let key = MessageKey::Local(message.temp_id.clone());
        if self.entries.contains_key(&key) {
            return AppendOutcome::ConflictIgnored;
        }

        self.logs
            .entry(conversation_id.clone())
            .or_default()
            .push(key.clone());
        self.entries
            .insert(key, MessageEntry::pending(conversation_id.clone(), message));
        AppendOutcome::Inserted
    }

    /// Replace the optimistic entry `temp_id` with its confirmed message
    ///
    /// The confirmed entry takes the shadow's slot in the log. If the
    /// server echo already landed, the shadow is dropped and the server
    /// copy is refreshed. Without a shadow the message is appended.
    pub fn promote(&mut self, temp_id: &TempId, confirmed: Message) -> PromoteOutcome {
        let local = MessageKey::Local(temp_id.clone());
        let server = MessageKey::Server(confirmed.id.clone());

        let Some(shadow) = self.entries.remove(&local) else {
            let conversation_id = confirmed.conversation_id.clone();
            return match self.append(&conversation_id, confirmed) {
                AppendOutcome::Inserted => PromoteOutcome::Appended,
                AppendOutcome::ConflictIgnored => PromoteOutcome::AlreadyKnown,
            };
        };

        let conversation_id = shadow.conversation_id;
        let log = self.logs.entry(conversation_id.clone()).or_default();

        if let Some(existing) = self.entries.get(&server) {
            let existing_conversation = existing.conversation_id.clone();
            log.retain(|k| k != &local);
            self.entries.insert(
                server,
                MessageEntry::confirmed(existing_conversation, confirmed),
            );
            return PromoteOutcome::Merged;
        }

        match log.iter_mut().find(|k| **k == local) {
            Some(slot) => *slot = server.clone(),
            None => log.push(server.clone()),
        }
        self.entries
            .insert(server, MessageEntry::confirmed(conversation_id, confirmed));
        PromoteOutcome::Promoted
    }

    /// Discard an optimistic entry, returning it
    pub fn remove(&mut self, temp_id: &TempId) -> Option<MessageEntry> {
        let key = MessageKey::Local(temp_id.clone());
        let entry = self.entries.remove(&key)?;
        if let Some(log) = self.logs.get_mut(&entry.conversation_id) {
            log.retain(|k| k != &key);
        }
        Some(entry)
    }

    /// Mark a pending entry as failed, keeping it visible
    pub fn mark_failed(&mut self, temp_id: &TempId) -> bool {
        match self.entries.get_mut(&MessageKey::Local(temp_id.clone())) {
            Some(entry) if entry.is_pending() => {
                entry.state = EntryState::Failed;
                true
            }
            _ => false,
        }
    }

    /// Merge a page of server state into a conversation
    ///
    /// Known messages are overwritten (the server owns delivery state and
    /// body); unknown ones are appended. Optimistic entries are left alone.
    /// Returns the number of entries inserted or changed.
    pub fn reconcile(&mut self, conversation_id: &ConversationId, messages: Vec<Message>) -> usize {
        let mut changed = 0;
        for message in messages {
            let key = MessageKey::Server(message.id.clone());
            match self.entries.get_mut(&key) {
                Some(existing) => {
                    let fresh = MessageEntry::confirmed(existing.conversation_id.clone(), message);
                    if *existing != fresh {
                        *existing = fresh;
                        changed += 1;
                    }
                }
                None => {
                    self.append(conversation_id, message);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Messages of a conversation in read order
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<MessageEntry> {
        let mut list: Vec<MessageEntry> = self.arrival_order(conversation_id).cloned().collect();
        list.sort_by(|a, b| a.read_order(b));
        list
    }

    /// Entries of a conversation in the order they were inserted
    pub fn arrival_order<'a>(
        &'a self,
        conversation_id: &ConversationId,
    ) -> impl Iterator<Item = &'a MessageEntry> + 'a {
        self.logs
            .get(conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|key| self.entries.get(key))
    }

    /// Latest entry of a conversation in read order
    pub fn latest(&self, conversation_id: &ConversationId) -> Option<&MessageEntry> {
        self.arrival_order(conversation_id)
            .max_by(|a, b| a.read_order(b))
    }

    /// All entries still waiting for the server
    pub fn pending(&self) -> Vec<&MessageEntry> {
        let mut pending: Vec<&MessageEntry> =
            self.entries.values().filter(|e| e.is_pending()).collect();
        pending.sort_by(|a, b| a.read_order(b));
        pending
    }

    pub fn get(&self, key: &MessageKey) -> Option<&MessageEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries in a conversation
    pub fn len(&self, conversation_id: &ConversationId) -> usize {
        self.logs.get(conversation_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.logs.clear();
    }
}
