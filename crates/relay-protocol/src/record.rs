//! Stored message representation sent to channel members.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display attributes of a message sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub profile_image: Option<String>,
}

/// The sender of a message: enriched with profile data when the sender is
/// a known user, the raw identifier otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sender {
    Profile(SenderProfile),
    Id(String),
}

impl Sender {
    /// The sender's identifier, regardless of enrichment.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Sender::Profile(profile) => &profile.id,
            Sender::Id(id) => id,
        }
    }

    /// Whether profile data was joined in.
    #[must_use]
    pub fn is_enriched(&self) -> bool {
        matches!(self, Sender::Profile(_))
    }
}

/// A stored message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub channel_name: String,
    pub message: String,
    pub sender_id: Sender,
    #[serde(default)]
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
}
