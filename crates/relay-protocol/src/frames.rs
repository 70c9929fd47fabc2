//! Frame types for the relay protocol.
//!
//! Inbound frames are decoded leniently: field values are kept as raw JSON
//! until validation, so a wrongly-typed field is reported as a validation
//! failure rather than a malformed payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::record::MessageRecord;

/// Client-facing validation failures.
///
/// The `Display` text is sent verbatim in the `error` notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `channelName` missing, empty, or not a string.
    #[error("Invalid channelName")]
    InvalidChannelName,

    /// `senderId` missing, empty, or not a string.
    #[error("senderId is required")]
    MissingSender,

    /// `message` present but not a string.
    #[error("message must be a string")]
    InvalidMessage,

    /// `receiverId` present but not a string.
    #[error("receiverId must be a string")]
    InvalidReceiver,

    /// `files` present but not an array of strings.
    #[error("files must be an array of strings")]
    InvalidFiles,
}

/// A decoded inbound frame, dispatched on its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// `{"type":"subscribe", ...}`
    Subscribe(SubscribeFrame),
    /// `{"type":"message", ...}`
    Message(PublishFrame),
    /// Any other (or missing) `type`.
    Unknown(Option<String>),
}

impl ClientFrame {
    /// The `type` tag of this frame, if it had one.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match self {
            ClientFrame::Subscribe(_) => Some("subscribe"),
            ClientFrame::Message(_) => Some("message"),
            ClientFrame::Unknown(kind) => kind.as_deref(),
        }
    }
}

/// Subscribe request, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeFrame {
    #[serde(default)]
    pub channel_name: Option<Value>,
}

impl SubscribeFrame {
    /// Create a subscribe frame for the given channel.
    #[must_use]
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: Some(Value::String(channel_name.into())),
        }
    }

    /// The validated channel name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidChannelName`] if the name is
    /// missing, empty, or not a string.
    pub fn channel_name(&self) -> Result<&str, ValidationError> {
        channel_name(self.channel_name.as_ref())
    }
}

/// Publish request, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishFrame {
    #[serde(default)]
    pub channel_name: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub sender_id: Option<Value>,
    #[serde(default)]
    pub receiver_id: Option<Value>,
    #[serde(default)]
    pub files: Option<Value>,
}

impl PublishFrame {
    /// Validate the frame into a [`Publish`] request.
    ///
    /// The channel is checked before the sender, so a frame missing both
    /// reports the channel.
    ///
    /// # Errors
    ///
    /// Returns the first failing field's [`ValidationError`].
    pub fn validate(&self) -> Result<Publish, ValidationError> {
        let channel_name = channel_name(self.channel_name.as_ref())?.to_owned();

        let sender_id = match &self.sender_id {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Err(ValidationError::MissingSender),
        };

        let message = match &self.message {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(ValidationError::InvalidMessage),
        };

        let receiver_id = match &self.receiver_id {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ValidationError::InvalidReceiver),
        };

        let files = match &self.files {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
                .ok_or(ValidationError::InvalidFiles)?,
            Some(_) => return Err(ValidationError::InvalidFiles),
        };

        Ok(Publish {
            channel_name,
            message,
            sender_id,
            receiver_id,
            files,
        })
    }
}

fn channel_name(value: Option<&Value>) -> Result<&str, ValidationError> {
    match value {
        Some(Value::String(name)) if !name.is_empty() => Ok(name),
        _ => Err(ValidationError::InvalidChannelName),
    }
}

/// A validated publish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub channel_name: String,
    pub message: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub files: Vec<String>,
}

/// An outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Subscription acknowledgment.
    #[serde(rename = "subscribed")]
    Subscribed {
        #[serde(rename = "channelName")]
        channel_name: String,
    },

    /// A stored message broadcast to channel members.
    #[serde(rename = "message")]
    Message {
        #[serde(rename = "channelName")]
        channel_name: String,
        data: MessageRecord,
    },

    /// Error notice for the originating connection.
    #[serde(rename = "error")]
    Error {
        message: String,
        /// Raw inbound payload, echoed back for parse failures.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl ServerFrame {
    /// Create a Subscribed frame.
    #[must_use]
    pub fn subscribed(channel_name: impl Into<String>) -> Self {
        ServerFrame::Subscribed {
            channel_name: channel_name.into(),
        }
    }

    /// Create a Message frame for a stored record.
    #[must_use]
    pub fn message(record: MessageRecord) -> Self {
        ServerFrame::Message {
            channel_name: record.channel_name.clone(),
            data: record,
        }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
            raw: None,
        }
    }

    /// Create the Error frame sent for unparseable input.
    #[must_use]
    pub fn malformed(raw: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: "Malformed JSON".to_string(),
            raw: Some(raw.into()),
        }
    }

    /// Create the Error frame sent for an unrecognised `type`.
    #[must_use]
    pub fn unknown_type() -> Self {
        Self::error("Unknown message type")
    }

    /// The `type` tag of this frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Subscribed { .. } => "subscribed",
            ServerFrame::Message { .. } => "message",
            ServerFrame::Error { .. } => "error",
        }
    }
}

impl From<ValidationError> for ServerFrame {
    fn from(err: ValidationError) -> Self {
        ServerFrame::error(err.to_string())
    }
}
