//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use parley_core::{Conversation, EntryState, Message, MessageEntry, UserId};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize output: {}", e),
        }
    }

    /// Print the conversation list, most recent first
    pub fn print_conversations(&self, conversations: &[Conversation], me: &UserId) {
        match self.format {
            OutputFormat::Human => {
                if conversations.is_empty() {
                    println!("No conversations yet.");
                    return;
                }
                for conversation in conversations {
                    println!(
                        "{} | {} | {}",
                        truncate(conversation.id.as_str(), 12),
                        truncate(&conversation.title_for(me), 30),
                        conversation.last_activity.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("\n{} conversation(s)", conversations.len());
            }
            OutputFormat::Json => self.print_json(conversations),
            OutputFormat::Quiet => {
                for conversation in conversations {
                    println!("{}", conversation.id);
                }
            }
        }
    }

    /// Print a single conversation
    pub fn print_conversation(&self, conversation: &Conversation, me: &UserId) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:           {}", conversation.id);
                println!("Title:        {}", conversation.title_for(me));
                let participants: Vec<&str> =
                    conversation.participants.iter().map(|p| p.as_str()).collect();
                println!("Participants: {}", participants.join(", "));
                println!(
                    "Last active:  {}",
                    conversation.last_activity.format("%Y-%m-%d %H:%M")
                );
            }
            OutputFormat::Json => self.print_json(conversation),
            OutputFormat::Quiet => println!("{}", conversation.id),
        }
    }

    /// Print messages in read order
    pub fn print_messages(&self, messages: &[MessageEntry]) {
        match self.format {
            OutputFormat::Human => {
                if messages.is_empty() {
                    println!("No messages.");
                    return;
                }
                for message in messages {
                    println!("{}", format_entry(message));
                }
            }
            OutputFormat::Json => self.print_json(messages),
            OutputFormat::Quiet => {
                for message in messages {
                    println!("{}", message.key);
                }
            }
        }
    }

    /// Print one message as it arrives (used by `watch`)
    pub fn print_entry(&self, entry: &MessageEntry) {
        match self.format {
            OutputFormat::Human => println!("{}", format_entry(entry)),
            OutputFormat::Json => match serde_json::to_string(entry) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Failed to serialize output: {}", e),
            },
            OutputFormat::Quiet => println!("{}", entry.key),
        }
    }

    /// Print a server-confirmed message
    pub fn print_message(&self, message: &Message) {
        match self.format {
            OutputFormat::Human => {
                println!("✓ Sent {} at {}", message.id, message.created_at.format("%H:%M:%S"));
            }
            OutputFormat::Json => self.print_json(message),
            OutputFormat::Quiet => println!("{}", message.id),
        }
    }

    /// Print an event line (used by `watch`)
    pub fn event(&self, kind: &str, detail: serde_json::Value, human: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", human),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"event": kind, "data": detail}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warning(&self, msg: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", msg);
        }
    }
}

fn format_entry(entry: &MessageEntry) -> String {
    let marker = match entry.state {
        EntryState::Confirmed => "",
        EntryState::Pending => " (sending)",
        EntryState::Failed => " (failed)",
    };
    format!(
        "[{}] {}: {}{}",
        entry.created_at.format("%Y-%m-%d %H:%M"),
        entry.sender,
        entry.body,
        marker
    )
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
