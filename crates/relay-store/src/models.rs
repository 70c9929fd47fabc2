//! Persisted channel and message models.

use chrono::{DateTime, Utc};
use relay_protocol::{MessageRecord, Sender};
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted channel.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Channel {
    pub id: Uuid,
    pub channel_name: String,
    /// Identifier of the user whose first message created the channel.
    pub sender_id: String,
    /// Counterpart for direct conversations.
    pub receiver_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Create a new channel record.
    #[must_use]
    pub fn new(
        channel_name: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_name: channel_name.into(),
            sender_id: sender_id.into(),
            receiver_id,
            created_at: Utc::now(),
        }
    }
}

/// A persisted message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub channel_name: String,
    pub message: String,
    pub sender_id: String,
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Convert to the wire record with the given sender representation.
    #[must_use]
    pub fn into_record(self, sender: Sender) -> MessageRecord {
        MessageRecord {
            id: self.id,
            channel_name: self.channel_name,
            message: self.message,
            sender_id: sender,
            files: self.files,
            created_at: self.created_at,
        }
    }
}

/// Input for [`MessageStore::create_message`](crate::MessageStore::create_message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub channel_name: String,
    pub message: String,
    pub sender_id: String,
    pub files: Vec<String>,
}

impl NewMessage {
    /// Create a message without attachments.
    #[must_use]
    pub fn new(
        channel_name: impl Into<String>,
        message: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            message: message.into(),
            sender_id: sender_id.into(),
            files: Vec::new(),
        }
    }

    /// Attach file references.
    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    /// Materialise the message with a fresh id and timestamp.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message {
            id: Uuid::new_v4(),
            channel_name: self.channel_name,
            message: self.message,
            sender_id: self.sender_id,
            files: self.files,
            created_at: Utc::now(),
        }
    }
}
