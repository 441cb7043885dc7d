//! Wire shapes
//!
//! JSON bodies shared by the REST API and push-channel payloads, and
//! their conversions into the domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    Conversation, ConversationId, DeliveryState, Message, MessageId, MessageKey, UserId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub id: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_message_id: Option<String>,
    #[serde(alias = "updatedAt")]
    pub last_activity: DateTime<Utc>,
}

impl From<ConversationDto> for Conversation {
    fn from(dto: ConversationDto) -> Self {
        Self {
            id: ConversationId::new(dto.id),
            participants: dto.participants.into_iter().map(UserId::new).collect(),
            name: dto.name,
            latest_message: dto
                .last_message_id
                .map(|id| MessageKey::Server(MessageId::new(id))),
            last_activity: dto.last_activity,
        }
    }
}

impl From<&Conversation> for ConversationDto {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.to_string(),
            participants: conversation
                .participants
                .iter()
                .map(|p| p.to_string())
                .collect(),
            name: conversation.name.clone(),
            last_message_id: match conversation.latest_message {
                Some(MessageKey::Server(ref id)) => Some(id.to_string()),
                _ => None,
            },
            last_activity: conversation.last_activity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub status: DeliveryState,
    pub created_at: DateTime<Utc>,
}

impl From<MessageDto> for Message {
    fn from(dto: MessageDto) -> Self {
        Self {
            id: MessageId::new(dto.id),
            conversation_id: ConversationId::new(dto.conversation_id),
            sender: UserId::new(dto.sender_id),
            body: dto.content,
            delivery: dto.status,
            created_at: dto.created_at,
        }
    }
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.to_string(),
            conversation_id: message.conversation_id.to_string(),
            sender_id: message.sender.to_string(),
            content: message.body.clone(),
            status: message.delivery,
            created_at: message.created_at,
        }
    }
}

/// Body of `POST /conversations`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest<'a> {
    pub participant_id: &'a str,
}

/// Body of `POST /conversations/{id}/messages`
#[derive(Debug, Serialize)]
pub struct CreateMessageRequest<'a> {
    pub content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_from_json() {
        let json = r#"{
            "id": "c1",
            "participants": ["alice", "bob"],
            "lastMessageId": "m7",
            "updatedAt": "2024-05-01T12:00:00Z"
        }"#;

        let dto: ConversationDto = serde_json::from_str(json).unwrap();
        let conv = Conversation::from(dto);
        assert_eq!(conv.id.as_str(), "c1");
        assert_eq!(conv.participants.len(), 2);
        assert!(conv.name.is_none());
        assert_eq!(
            conv.latest_message,
            Some(MessageKey::Server(MessageId::new("m7")))
        );
    }

    #[test]
    fn test_message_status_defaults_to_sent() {
        let json = r#"{
            "id": "m1",
            "conversationId": "c1",
            "senderId": "bob",
            "content": "hello",
            "createdAt": "2024-05-01T12:00:00Z"
        }"#;

        let message = Message::from(serde_json::from_str::<MessageDto>(json).unwrap());
        assert_eq!(message.delivery, DeliveryState::Sent);
        assert_eq!(message.sender.as_str(), "bob");
        assert_eq!(message.body, "hello");
    }
}
