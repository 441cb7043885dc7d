//! Watch command
//!
//! Goes live and prints updates until Ctrl-C. With a conversation id,
//! lines typed on stdin are sent to that conversation.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use parley_core::{
    Config, ConversationId, EntryState, MessageKey, SyncCoordinator, SyncState, SyncUpdate,
};

use crate::output::Output;

/// Typed commands
const RETRY: &str = "/retry";
const QUIT: &str = "/quit";

struct Watcher<'a> {
    coordinator: &'a SyncCoordinator,
    active: Option<ConversationId>,
    seen: HashSet<MessageKey>,
    output: &'a Output,
}

pub async fn watch(config: &Config, conversation_id: Option<String>, output: &Output) -> Result<()> {
    let coordinator = super::open(config).await?;
    let mut updates = coordinator.subscribe();

    let mut watcher = Watcher {
        coordinator: &coordinator,
        active: conversation_id.map(ConversationId::new),
        seen: HashSet::new(),
        output,
    };

    if let Some(ref id) = watcher.active {
        coordinator
            .set_active_conversation(Some(id))
            .await
            .map_err(super::with_hint)
            .with_context(|| format!("Failed to open conversation {}", id))?;
        let history = coordinator.messages(id);
        output.print_messages(&history);
        watcher.seen.extend(history.into_iter().map(|m| m.key));
        output.message(&format!(
            "Type a message to send it, {} to reconnect, {} or Ctrl-C to quit.",
            RETRY, QUIT
        ));
    } else {
        output.message("Watching all conversations. Ctrl-C to quit.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(update) => {
                    if !watcher.on_update(update) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => debug!("Skipped {} updates", n),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !watcher.on_line(line.trim()).await {
                        break;
                    }
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

impl Watcher<'_> {
    fn is_watched(&self, conversation_id: &ConversationId) -> bool {
        self.active.as_ref().map_or(true, |id| id == conversation_id)
    }

    /// Returns false when watching should stop
    fn on_update(&mut self, update: SyncUpdate) -> bool {
        match update {
            SyncUpdate::StateChanged(state) => {
                self.output.event(
                    "state",
                    serde_json::json!(state),
                    &format!("● {}", state),
                );
                match state {
                    SyncState::Degraded => self
                        .output
                        .warning("Live updates paused; sending still works."),
                    SyncState::Exhausted => {
                        if let Some(failure) = self.coordinator.connection_failure() {
                            self.output.warning(&failure.to_string());
                        }
                        self.output
                            .warning(&format!("Type {} to reconnect manually.", RETRY));
                    }
                    _ => {}
                }
            }
            SyncUpdate::MessagesChanged(conversation_id) => {
                if !self.is_watched(&conversation_id) {
                    return true;
                }
                for entry in self.coordinator.messages(&conversation_id) {
                    if entry.state == EntryState::Confirmed && self.seen.insert(entry.key.clone())
                    {
                        self.output.print_entry(&entry);
                    }
                }
            }
            SyncUpdate::TypingChanged {
                conversation_id,
                user_id,
                is_typing,
            } => {
                if !self.is_watched(&conversation_id) {
                    return true;
                }
                let human = if is_typing {
                    format!("{} is typing…", user_id)
                } else {
                    format!("{} stopped typing", user_id)
                };
                self.output.event(
                    "typing",
                    serde_json::json!({
                        "conversation_id": conversation_id,
                        "user_id": user_id,
                        "is_typing": is_typing
                    }),
                    &human,
                );
            }
            SyncUpdate::SendFailed {
                conversation_id,
                reason,
                ..
            } => {
                self.output
                    .warning(&format!("Send to {} failed: {}", conversation_id, reason));
            }
            SyncUpdate::SessionEnded(reason) => {
                self.output.warning(&format!("Session ended: {}", reason));
                return false;
            }
            SyncUpdate::ConnectionChanged(state) => debug!("Connection: {:?}", state),
            SyncUpdate::ConversationsChanged => {}
        }
        true
    }

    /// Returns false when watching should stop
    async fn on_line(&mut self, line: &str) -> bool {
        match line {
            "" => {}
            QUIT => return false,
            RETRY => match self.coordinator.retry_connection() {
                Ok(()) => self.output.message("Reconnecting…"),
                Err(e) => self.output.warning(&format!("Cannot reconnect: {}", e)),
            },
            text => {
                let Some(ref conversation_id) = self.active else {
                    self.output
                        .warning("Pass a conversation id to `parley watch` to send messages.");
                    return true;
                };
                if let Err(failure) = self.coordinator.send_message(conversation_id, text).await {
                    self.output.warning(&format!(
                        "{}\nNot sent: {}",
                        failure, failure.content
                    ));
                }
            }
        }
        true
    }
}
