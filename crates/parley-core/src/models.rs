//! Data models for Parley
//!
//! Defines the core data structures: Conversation, Message, and the
//! client-local OptimisticMessage shadow, plus the opaque identifiers
//! that tie them together.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(
    /// Server-assigned conversation identity
    ConversationId
);
opaque_id!(
    /// Identity of a chat participant
    UserId
);
opaque_id!(
    /// Server-assigned message identity (never generated by the client)
    MessageId
);
opaque_id!(
    /// Client-local identity of a not-yet-confirmed message
    TempId
);

impl TempId {
    /// Generate a fresh local identity
    pub fn generate() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }
}

/// Delivery progress of a confirmed message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    #[default]
    Sent,
    Delivered,
    Read,
}

/// Key of an entry in the message log
///
/// Pending entries are keyed by their temporary identity until the server
/// acknowledges them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum MessageKey {
    Local(TempId),
    Server(MessageId),
}

impl MessageKey {
    /// The identity string used for tie-breaking
    pub fn as_str(&self) -> &str {
        match self {
            MessageKey::Local(id) => id.as_str(),
            MessageKey::Server(id) => id.as_str(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, MessageKey::Local(_))
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversation between participants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    /// Unique identifier
    pub id: ConversationId,
    /// Participants (a pair for direct conversations)
    pub participants: Vec<UserId>,
    /// Optional display name
    pub name: Option<String>,
    /// Pointer to the latest message (by key, not embedded)
    pub latest_message: Option<MessageKey>,
    /// Timestamp of the latest activity
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    /// Create a conversation with no messages yet
    pub fn new(
        id: impl Into<ConversationId>,
        participants: Vec<UserId>,
        last_activity: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            participants,
            name: None,
            latest_message: None,
            last_activity,
        }
    }

    /// Whether this is a group conversation (more than two participants)
    pub fn is_group(&self) -> bool {
        self.participants.len() > 2
    }

    /// Whether this is the direct conversation between `a` and `b`
    ///
    /// The participant pair is unordered.
    pub fn is_direct_between(&self, a: &UserId, b: &UserId) -> bool {
        !self.is_group()
            && self.participants.len() == 2
            && self.participants.contains(a)
            && self.participants.contains(b)
    }

    /// Title to show for `me`: the name, or the other participants
    pub fn title_for(&self, me: &UserId) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        let others: Vec<&str> = self
            .participants
            .iter()
            .filter(|p| *p != me)
            .map(|p| p.as_str())
            .collect();
        if others.is_empty() {
            self.id.to_string()
        } else {
            others.join(", ")
        }
    }
}

/// A server-confirmed message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Server-assigned identity
    pub id: MessageId,
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Who sent it
    pub sender: UserId,
    /// Message text
    pub body: String,
    /// Delivery progress
    pub delivery: DeliveryState,
    /// Creation timestamp (server clock)
    pub created_at: DateTime<Utc>,
}

/// Client-local shadow of a message awaiting server acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticMessage {
    pub temp_id: TempId,
    pub conversation_id: ConversationId,
    pub sender: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl OptimisticMessage {
    /// Create a shadow with a fresh temporary identity
    pub fn new(conversation_id: ConversationId, sender: UserId, body: impl Into<String>) -> Self {
        Self {
            temp_id: TempId::generate(),
            conversation_id,
            sender,
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id)
    }

    #[test]
    fn test_temp_id_is_unique() {
        let a = TempId::generate();
        let b = TempId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("local-"));
    }

    #[test]
    fn test_direct_conversation_pair_is_unordered() {
        let conv = Conversation::new("c1", vec![user("alice"), user("bob")], Utc::now());
        assert!(conv.is_direct_between(&user("alice"), &user("bob")));
        assert!(conv.is_direct_between(&user("bob"), &user("alice")));
        assert!(!conv.is_direct_between(&user("alice"), &user("carol")));
    }

    #[test]
    fn test_group_is_never_direct() {
        let conv = Conversation::new(
            "c1",
            vec![user("alice"), user("bob"), user("carol")],
            Utc::now(),
        );
        assert!(conv.is_group());
        assert!(!conv.is_direct_between(&user("alice"), &user("bob")));
    }

    #[test]
    fn test_title_for() {
        let mut conv = Conversation::new("c1", vec![user("alice"), user("bob")], Utc::now());
        assert_eq!(conv.title_for(&user("alice")), "bob");

        conv.name = Some("Weekend plans".to_string());
        assert_eq!(conv.title_for(&user("alice")), "Weekend plans");
    }

    #[test]
    fn test_delivery_state_serialization() {
        let json = serde_json::to_string(&DeliveryState::Delivered).unwrap();
        assert_eq!(json, "\"delivered\"");
        let parsed: DeliveryState = serde_json::from_str("\"read\"").unwrap();
        assert_eq!(parsed, DeliveryState::Read);
    }
}
