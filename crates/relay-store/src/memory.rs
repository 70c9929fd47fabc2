//! In-process message store.

use async_trait::async_trait;
use dashmap::DashMap;
use relay_protocol::{MessageRecord, Sender, SenderProfile};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{Channel, Message, NewMessage};
use crate::store::MessageStore;

/// A [`MessageStore`] backed by concurrent in-memory maps.
///
/// Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: DashMap<String, Channel>,
    messages: DashMap<Uuid, Message>,
    profiles: DashMap<String, SenderProfile>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a sender profile used for enrichment.
    pub fn upsert_profile(&self, profile: SenderProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Get a stored message without enrichment.
    #[must_use]
    pub fn message(&self, id: Uuid) -> Option<Message> {
        self.messages.get(&id).map(|m| m.clone())
    }

    /// All messages of a channel, oldest first.
    #[must_use]
    pub fn messages_in(&self, channel_name: &str) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.channel_name == channel_name)
            .map(|m| m.clone())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    /// Number of stored channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of stored messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn find_channel(&self, channel_name: &str) -> StoreResult<Option<Channel>> {
        Ok(self.channels.get(channel_name).map(|c| c.clone()))
    }

    async fn create_channel(
        &self,
        channel_name: &str,
        sender_id: &str,
        receiver_id: Option<&str>,
    ) -> StoreResult<Channel> {
        let channel = self
            .channels
            .entry(channel_name.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel_name, "Creating channel record");
                Channel::new(channel_name, sender_id, receiver_id.map(str::to_owned))
            })
            .clone();
        Ok(channel)
    }

    async fn create_message(&self, message: NewMessage) -> StoreResult<Message> {
        if !self.channels.contains_key(&message.channel_name) {
            return Err(StoreError::ChannelNotFound(message.channel_name));
        }

        let message = message.into_message();
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get_message_enriched(&self, id: Uuid) -> StoreResult<Option<MessageRecord>> {
        let Some(message) = self.message(id) else {
            return Ok(None);
        };

        let sender = match self.profiles.get(&message.sender_id) {
            Some(profile) => Sender::Profile(profile.clone()),
            None => Sender::Id(message.sender_id.clone()),
        };
        Ok(Some(message.into_record(sender)))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
