//! The relay engine.
//!
//! Parses inbound text frames, validates them, and drives the directory and
//! the message store. Publishing is persist-then-broadcast: members only ever
//! see messages that are already readable from the store.

use crate::directory::{ChannelDirectory, DirectoryError, DirectoryStats};
use crate::liveness::LivenessMonitor;
use crate::registry::{ConnectionId, ConnectionRegistry, Outbound, Outbox};
use relay_protocol::{
    codec, ClientFrame, ProtocolError, Publish, ServerFrame, ValidationError,
};
use relay_store::{MessageStore, NewMessage, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

/// Relay errors. Each is reported to the originating connection only.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound text could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A request field failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The request's `type` is not handled.
    #[error("Unknown message type: {0:?}")]
    UnknownType(Option<String>),

    /// Membership could not be changed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The store rejected a lookup or write.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A message was written but could not be read back for delivery.
    /// The write is kept; nothing is broadcast.
    #[error("Stored message {0} could not be read back")]
    Inconsistent(Uuid),
}

impl RelayError {
    /// The notice to send to the client, if the client should hear about it.
    #[must_use]
    pub fn notice(&self) -> Option<ServerFrame> {
        match self {
            RelayError::Protocol(e) => Some(e.notice()),
            RelayError::Validation(e) => Some(ServerFrame::from(*e)),
            RelayError::UnknownType(_) => Some(ServerFrame::unknown_type()),
            RelayError::Directory(DirectoryError::InvalidChannelName) => {
                Some(ServerFrame::from(ValidationError::InvalidChannelName))
            }
            RelayError::Directory(DirectoryError::UnknownConnection(_)) => None,
            RelayError::Store(_) => Some(ServerFrame::error("Failed to store message")),
            RelayError::Inconsistent(_) => Some(ServerFrame::error("Failed to load stored message")),
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Protocol(ProtocolError::Malformed { .. }) => "parse",
            RelayError::Protocol(ProtocolError::Encode(_)) => "encode",
            RelayError::Validation(_) | RelayError::Directory(DirectoryError::InvalidChannelName) => {
                "validation"
            }
            RelayError::UnknownType(_) => "unknown_type",
            RelayError::Directory(DirectoryError::UnknownConnection(_)) => "unknown_connection",
            RelayError::Store(_) => "store",
            RelayError::Inconsistent(_) => "inconsistent",
        }
    }
}

/// What a successfully handled request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// The connection joined `channel`, leaving `previous` if it switched.
    Subscribed {
        channel: String,
        previous: Option<String>,
    },
    /// A message was stored and fanned out to `recipients` members.
    Published {
        channel: String,
        message_id: Uuid,
        recipients: usize,
    },
}

/// Orchestrates subscribe and publish requests.
pub struct Relay {
    directory: Arc<ChannelDirectory>,
    store: Arc<dyn MessageStore>,
}

impl Relay {
    /// Create a relay with an empty registry and directory.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self::with_directory(Arc::new(ChannelDirectory::new(registry)), store)
    }

    /// Create a relay over an existing directory.
    #[must_use]
    pub fn with_directory(directory: Arc<ChannelDirectory>, store: Arc<dyn MessageStore>) -> Self {
        debug!(backend = store.backend(), "Creating relay");
        Self { directory, store }
    }

    /// The channel directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<ChannelDirectory> {
        &self.directory
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.directory.registry()
    }

    /// The message store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Register a new connection.
    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        self.registry().register(outbox)
    }

    /// Tear down a connection: unregister it and purge its membership.
    pub fn disconnect(&self, id: ConnectionId) {
        if let Some(snapshot) = self.directory.remove_connection(id) {
            debug!(
                connection = %id,
                channel = ?snapshot.channel,
                uptime_ms = snapshot.connected_at.elapsed().as_millis() as u64,
                "Disconnected"
            );
        }
    }

    /// Record a liveness acknowledgment (pong).
    pub fn acknowledge_probe(&self, id: ConnectionId) {
        self.registry().mark_alive(id);
    }

    /// A liveness monitor over this relay's directory.
    #[must_use]
    pub fn liveness_monitor(&self, interval: Duration) -> LivenessMonitor {
        LivenessMonitor::new(Arc::clone(&self.directory), interval)
    }

    /// Directory statistics.
    #[must_use]
    pub fn stats(&self) -> DirectoryStats {
        self.directory.stats()
    }

    /// Terminate every connection and clear all membership.
    pub fn drain(&self) {
        self.directory.clear();
    }

    /// Handle one inbound text frame from `id`.
    ///
    /// Failures are answered with an `error` notice to `id` and also
    /// returned for logging; the connection stays usable either way.
    pub async fn handle_text(&self, id: ConnectionId, raw: &str) -> Result<Handled, RelayError> {
        let result = self.dispatch(id, raw).await;

        if let Err(e) = &result {
            match e {
                RelayError::Store(_) | RelayError::Inconsistent(_) => {
                    error!(connection = %id, error = %e, "Request failed")
                }
                _ => debug!(connection = %id, error = %e, "Request rejected"),
            }
            if let Some(notice) = e.notice() {
                self.reply(id, &notice);
            }
        }

        result
    }

    async fn dispatch(&self, id: ConnectionId, raw: &str) -> Result<Handled, RelayError> {
        let frame = codec::decode(raw)?;
        trace!(connection = %id, kind = ?frame.kind(), "Dispatching request");

        match frame {
            ClientFrame::Subscribe(frame) => {
                let channel = frame.channel_name()?;
                self.subscribe(id, channel)
            }
            ClientFrame::Message(frame) => {
                let request = frame.validate()?;
                self.publish(id, request).await
            }
            ClientFrame::Unknown(kind) => Err(RelayError::UnknownType(kind)),
        }
    }

    /// Subscribe `id` to `channel`, replacing prior membership, and
    /// acknowledge with a `subscribed` frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or `id` is not registered.
    pub fn subscribe(&self, id: ConnectionId, channel: &str) -> Result<Handled, RelayError> {
        let previous = self.directory.subscribe(channel, id)?;
        self.reply(id, &ServerFrame::subscribed(channel));

        Ok(Handled::Subscribed {
            channel: channel.to_string(),
            previous,
        })
    }

    /// Persist a message and broadcast it to the channel, excluding `sender`.
    ///
    /// The channel record is created on first use. The broadcast carries
    /// the stored message as read back from the store with the sender's
    /// profile joined in. If that read-back fails the request fails and
    /// nothing is broadcast, but the stored message is not rolled back.
    ///
    /// The sender need not still be connected; its publish completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the read-back finds nothing.
    pub async fn publish(
        &self,
        sender: ConnectionId,
        request: Publish,
    ) -> Result<Handled, RelayError> {
        let Publish {
            channel_name,
            message,
            sender_id,
            receiver_id,
            files,
        } = request;

        let channel = match self.store.find_channel(&channel_name).await? {
            Some(channel) => channel,
            None => {
                self.store
                    .create_channel(&channel_name, &sender_id, receiver_id.as_deref())
                    .await?
            }
        };

        let stored = self
            .store
            .create_message(
                NewMessage::new(channel.channel_name.clone(), message, sender_id).with_files(files),
            )
            .await?;
        trace!(connection = %sender, message = %stored.id, "Message stored");

        let record = match self.store.get_message_enriched(stored.id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(RelayError::Inconsistent(stored.id)),
            Err(e) => {
                warn!(message = %stored.id, error = %e, "Read-back of stored message failed");
                return Err(RelayError::Inconsistent(stored.id));
            }
        };

        let enriched = record.sender_id.is_enriched();
        let payload: Arc<str> = codec::encode(&ServerFrame::message(record))?.into();
        let recipients = self
            .directory
            .broadcast(&channel.channel_name, &payload, Some(sender));

        debug!(
            connection = %sender,
            channel = %channel.channel_name,
            message = %stored.id,
            enriched,
            recipients,
            "Published"
        );

        Ok(Handled::Published {
            channel: channel.channel_name,
            message_id: stored.id,
            recipients,
        })
    }

    /// Send a frame to a single connection.
    fn reply(&self, id: ConnectionId, frame: &ServerFrame) {
        match codec::encode(frame) {
            Ok(text) => {
                if !self.registry().send(id, Outbound::Text(text.into())) {
                    trace!(connection = %id, kind = frame.kind(), "Reply dropped, connection gone");
                }
            }
            Err(e) => error!(connection = %id, error = %e, "Failed to encode reply"),
        }
    }
}
