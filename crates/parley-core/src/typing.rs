//! Typing indicators
//!
//! Ephemeral per-(conversation, user) state. Every "typing" signal
//! (re)starts an expiry timer; when it fires the entry is cleared as if a
//! "stopped typing" signal had arrived. The push channel never redelivers,
//! so the timer is what bounds a stuck indicator.
//!
//! Timers are tokio tasks: `set_typing` must be called inside a runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::models::{ConversationId, UserId};

/// A change in someone's typing state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
    /// When the indicator lapses without a refresh
    pub expires_at: Option<Instant>,
}

type TypingKey = (ConversationId, UserId);

#[derive(Debug)]
struct TypingEntry {
    expires_at: Instant,
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Entries {
    next_generation: u64,
    map: HashMap<TypingKey, TypingEntry>,
}

fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks who is typing where
#[derive(Debug)]
pub struct TypingTracker {
    ttl: Duration,
    entries: Arc<Mutex<Entries>>,
    changes: broadcast::Sender<TypingSignal>,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            ttl,
            entries: Arc::new(Mutex::new(Entries::default())),
            changes,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Receive a signal whenever an indicator turns on or off
    pub fn subscribe(&self) -> broadcast::Receiver<TypingSignal> {
        self.changes.subscribe()
    }

    /// Apply a typing signal
    pub fn set_typing(&self, conversation_id: &ConversationId, user_id: &UserId, is_typing: bool) {
        let key = (conversation_id.clone(), user_id.clone());
        let mut entries = lock(&self.entries);

        if !is_typing {
            if let Some(entry) = entries.map.remove(&key) {
                entry.timer.abort();
                drop(entries);
                self.notify(key, false, None);
            }
            return;
        }

        entries.next_generation += 1;
        let generation = entries.next_generation;
        let expires_at = Instant::now() + self.ttl;
        let timer = tokio::spawn(expire_after(
            Arc::clone(&self.entries),
            self.changes.clone(),
            key.clone(),
            generation,
            expires_at,
        ));

        let previous = entries.map.insert(
            key.clone(),
            TypingEntry {
                expires_at,
                generation,
                timer,
            },
        );
        drop(entries);

        match previous {
            Some(old) => {
                old.timer.abort();
                trace!("Typing refreshed for {} in {}", key.1, key.0);
            }
            None => self.notify(key, true, Some(expires_at)),
        }
    }

    /// Whether a specific user is typing in a conversation
    pub fn is_typing(&self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        lock(&self.entries)
            .map
            .contains_key(&(conversation_id.clone(), user_id.clone()))
    }

    /// Whether anyone is typing in a conversation
    pub fn is_anyone_typing(&self, conversation_id: &ConversationId) -> bool {
        lock(&self.entries)
            .map
            .keys()
            .any(|(c, _)| c == conversation_id)
    }

    /// Users currently typing in a conversation, sorted
    pub fn typing_users(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        let mut users: Vec<UserId> = lock(&self.entries)
            .map
            .keys()
            .filter(|(c, _)| c == conversation_id)
            .map(|(_, u)| u.clone())
            .collect();
        users.sort();
        users
    }

    /// When a user's indicator lapses, if they are typing
    pub fn expires_at(&self, conversation_id: &ConversationId, user_id: &UserId) -> Option<Instant> {
        lock(&self.entries)
            .map
            .get(&(conversation_id.clone(), user_id.clone()))
            .map(|e| e.expires_at)
    }

    /// Clear every indicator and cancel all timers
    pub fn clear(&self) {
        let drained: Vec<(TypingKey, TypingEntry)> = lock(&self.entries).map.drain().collect();
        for (key, entry) in drained {
            entry.timer.abort();
            self.notify(key, false, None);
        }
    }

    fn notify(&self, key: TypingKey, is_typing: bool, expires_at: Option<Instant>) {
        // No subscribers is fine
        let _ = self.changes.send(TypingSignal {
            conversation_id: key.0,
            user_id: key.1,
            is_typing,
            expires_at,
        });
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        for entry in lock(&self.entries).map.values() {
            entry.timer.abort();
        }
    }
}

/// Timer body: clear the entry unless it was refreshed meanwhile
async fn expire_after(
    entries: Arc<Mutex<Entries>>,
    changes: broadcast::Sender<TypingSignal>,
    key: TypingKey,
    generation: u64,
    deadline: Instant,
) {
    tokio::time::sleep_until(deadline).await;

    let expired = {
        let mut guard = lock(&entries);
        match guard.map.get(&key) {
            Some(entry) if entry.generation == generation => guard.map.remove(&key).is_some(),
            _ => false,
        }
    };

    if expired {
        trace!("Typing expired for {} in {}", key.1, key.0);
        let _ = changes.send(TypingSignal {
            conversation_id: key.0,
            user_id: key.1,
            is_typing: false,
            expires_at: None,
        });
    }
}
