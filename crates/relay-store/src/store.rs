//! The message store contract.

use async_trait::async_trait;
use relay_protocol::MessageRecord;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{Channel, Message, NewMessage};

/// Durable storage for channels and messages.
///
/// Implementations must make [`create_channel`](Self::create_channel)
/// idempotent: when two writers race on the same name, both receive the
/// channel that won.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Look up a channel by name.
    async fn find_channel(&self, channel_name: &str) -> StoreResult<Option<Channel>>;

    /// Create a channel, or return the existing one with the same name.
    async fn create_channel(
        &self,
        channel_name: &str,
        sender_id: &str,
        receiver_id: Option<&str>,
    ) -> StoreResult<Channel>;

    /// Persist a new message.
    async fn create_message(&self, message: NewMessage) -> StoreResult<Message>;

    /// Read a stored message back, joined with its sender's profile.
    ///
    /// Returns `None` if no message with this id exists.
    async fn get_message_enriched(&self, id: Uuid) -> StoreResult<Option<MessageRecord>>;

    /// Backend name, for logs.
    fn backend(&self) -> &'static str;
}
