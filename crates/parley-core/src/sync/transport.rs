//! Push-channel events and the transport seam
//!
//! Every frame is an envelope `{ "event": <name>, "data": <payload> }`.
//! Text frames carry it as JSON, binary frames as CBOR. Outbound emits are
//! always JSON text.

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::dto::{ConversationDto, MessageDto};
use crate::error::{SyncError, SyncResult};
use crate::models::{Conversation, ConversationId, Message, UserId};
use crate::session::Session;

/// Names of the inbound events handlers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    MessageReceived,
    Typing,
    ConversationCreated,
}

impl EventName {
    pub const ALL: [EventName; 3] = [
        EventName::MessageReceived,
        EventName::Typing,
        EventName::ConversationCreated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::MessageReceived => "message-received",
            EventName::Typing => "typing",
            EventName::ConversationCreated => "conversation-created",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered by the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    MessageReceived {
        conversation_id: ConversationId,
        message: Message,
    },
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    ConversationCreated {
        conversation: Conversation,
    },
}

/// An event we emit on the push channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    JoinConversation {
        conversation_id: ConversationId,
    },
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
        user_id: UserId,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Frame<T> {
    event: String,
    data: T,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageReceivedPayload {
    conversation_id: String,
    message: MessageDto,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    conversation_id: String,
    user_id: String,
    is_typing: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConversationCreatedPayload {
    conversation: ConversationDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinPayload<'a> {
    conversation_id: &'a str,
}

fn payload<T: DeserializeOwned>(event: &str, data: serde_json::Value) -> SyncResult<T> {
    serde_json::from_value(data)
        .map_err(|e| SyncError::Protocol(format!("Malformed '{}' payload: {}", event, e)))
}

impl InboundEvent {
    pub fn name(&self) -> EventName {
        match self {
            InboundEvent::MessageReceived { .. } => EventName::MessageReceived,
            InboundEvent::Typing { .. } => EventName::Typing,
            InboundEvent::ConversationCreated { .. } => EventName::ConversationCreated,
        }
    }

    /// Decode a JSON text frame
    ///
    /// Returns `Ok(None)` for events we don't know about.
    pub fn decode_text(text: &str) -> SyncResult<Option<Self>> {
        let frame: Frame<serde_json::Value> = serde_json::from_str(text)
            .map_err(|e| SyncError::Protocol(format!("Invalid frame: {}", e)))?;
        Self::from_frame(frame)
    }

    /// Decode a CBOR binary frame
    pub fn decode_binary(bytes: &[u8]) -> SyncResult<Option<Self>> {
        let frame: Frame<serde_json::Value> = ciborium::from_reader(bytes)
            .map_err(|e| SyncError::Protocol(format!("Invalid binary frame: {}", e)))?;
        Self::from_frame(frame)
    }

    fn from_frame(frame: Frame<serde_json::Value>) -> SyncResult<Option<Self>> {
        let Some(name) = EventName::parse(&frame.event) else {
            return Ok(None);
        };

        let event = match name {
            EventName::MessageReceived => {
                let p: MessageReceivedPayload = payload(&frame.event, frame.data)?;
                InboundEvent::MessageReceived {
                    conversation_id: ConversationId::new(p.conversation_id),
                    message: p.message.into(),
                }
            }
            EventName::Typing => {
                let p: TypingPayload = payload(&frame.event, frame.data)?;
                InboundEvent::Typing {
                    conversation_id: ConversationId::new(p.conversation_id),
                    user_id: UserId::new(p.user_id),
                    is_typing: p.is_typing,
                }
            }
            EventName::ConversationCreated => {
                let p: ConversationCreatedPayload = payload(&frame.event, frame.data)?;
                InboundEvent::ConversationCreated {
                    conversation: p.conversation.into(),
                }
            }
        };
        Ok(Some(event))
    }

    /// Encode as a JSON text frame (what the server sends)
    pub fn encode_text(&self) -> SyncResult<String> {
        let name = self.name().as_str().to_string();
        let data = match self {
            InboundEvent::MessageReceived {
                conversation_id,
                message,
            } => serde_json::to_value(MessageReceivedPayload {
                conversation_id: conversation_id.to_string(),
                message: MessageDto::from(message),
            }),
            InboundEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            } => serde_json::to_value(TypingPayload {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
                is_typing: *is_typing,
            }),
            InboundEvent::ConversationCreated { conversation } => {
                serde_json::to_value(ConversationCreatedPayload {
                    conversation: ConversationDto::from(conversation),
                })
            }
        }
        .map_err(|e| SyncError::Protocol(e.to_string()))?;

        serde_json::to_string(&Frame { event: name, data })
            .map_err(|e| SyncError::Protocol(e.to_string()))
    }
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinConversation { .. } => "join-conversation",
            OutboundEvent::Typing { .. } => "typing",
        }
    }

    /// Encode as a JSON text frame
    pub fn encode(&self) -> SyncResult<String> {
        let data = match self {
            OutboundEvent::JoinConversation { conversation_id } => {
                serde_json::to_value(JoinPayload {
                    conversation_id: conversation_id.as_str(),
                })
            }
            OutboundEvent::Typing {
                conversation_id,
                is_typing,
                user_id,
            } => serde_json::to_value(TypingPayload {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
                is_typing: *is_typing,
            }),
        }
        .map_err(|e| SyncError::Protocol(e.to_string()))?;

        serde_json::to_string(&Frame {
            event: self.name().to_string(),
            data,
        })
        .map_err(|e| SyncError::Protocol(e.to_string()))
    }
}

/// Opens authenticated push-channel links
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one link; `SyncError::Auth` if the server rejects the credential
    async fn connect(&self, session: &Session) -> SyncResult<Box<dyn PushLink>>;
}

/// One physical push-channel connection
#[async_trait]
pub trait PushLink: Send {
    /// Next inbound event
    ///
    /// `None` once the connection is closed. Must be cancel-safe.
    async fn next_event(&mut self) -> Option<SyncResult<InboundEvent>>;

    /// Emit an event to the server
    async fn send(&mut self, event: &OutboundEvent) -> SyncResult<()>;

    /// Close the connection
    async fn close(&mut self);
}
