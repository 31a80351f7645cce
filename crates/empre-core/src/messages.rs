use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;
use crate::ids::{EntityId, MessageId, UserId};

/// Upper bound on message content, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

/// A persisted chat message. This is also the outbound live envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    /// The customer side of the conversation.
    pub user_id: UserId,
    /// The business side of the conversation.
    pub entity_id: EntityId,
    pub sent_by_entity: bool,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Inbound envelope, from a socket frame or the send-message API.
///
/// Unknown fields are ignored, which includes any client-supplied
/// `sender_id`: the sender always comes from the authenticated connection.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundMessage {
    pub user_id: UserId,
    pub entity_id: EntityId,
    pub content: String,
    #[serde(default)]
    pub sent_by_entity: bool,
}

impl InboundMessage {
    /// Parse a raw frame.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Validate and stamp the authenticated sender.
    pub fn into_new(self, sender_id: UserId) -> Result<NewMessage, LedgerError> {
        if self.content.trim().is_empty() {
            return Err(LedgerError::Invalid("content must not be empty".into()));
        }
        let chars = self.content.chars().count();
        if chars > MAX_CONTENT_CHARS {
            return Err(LedgerError::Invalid(format!(
                "content is {chars} characters, limit is {MAX_CONTENT_CHARS}"
            )));
        }
        Ok(NewMessage {
            sender_id,
            user_id: self.user_id,
            entity_id: self.entity_id,
            sent_by_entity: self.sent_by_entity,
            content: self.content,
        })
    }
}

/// A validated message that has not been written to the ledger yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub user_id: UserId,
    pub entity_id: EntityId,
    pub sent_by_entity: bool,
    pub content: String,
}

impl NewMessage {
    /// Materialize with the given id and timestamp.
    pub fn into_message(self, id: MessageId, created_at: DateTime<Utc>) -> Message {
        Message {
            id,
            sender_id: self.sender_id,
            user_id: self.user_id,
            entity_id: self.entity_id,
            sent_by_entity: self.sent_by_entity,
            content: self.content,
            is_read: false,
            created_at,
            deleted_at: None,
        }
    }

    /// Materialize without persistence. Used when the ledger write failed
    /// and the message is still routed live.
    pub fn into_unpersisted(self) -> Message {
        self.into_message(MessageId::new(), Utc::now())
    }
}
