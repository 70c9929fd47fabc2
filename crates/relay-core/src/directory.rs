//! Channel directory: which connections are subscribed to which channel.
//!
//! Membership lives only in memory. A connection belongs to at most one
//! channel; the current channel is recorded on its registry entry, and a
//! channel switch runs under that entry's lock so it cannot interleave with
//! the connection's removal. Lock order is always registry, then directory.

use crate::registry::{ConnectionId, ConnectionRegistry, ConnectionSnapshot, Outbound};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Directory errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// Channel name is empty.
    #[error("Invalid channelName")]
    InvalidChannelName,

    /// The connection is not (or no longer) registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

/// Maps channel names to their member sets.
#[derive(Debug)]
pub struct ChannelDirectory {
    channels: DashMap<String, HashSet<ConnectionId>>,
    registry: Arc<ConnectionRegistry>,
}

impl ChannelDirectory {
    /// Create an empty directory over a registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            channels: DashMap::new(),
            registry,
        }
    }

    /// The registry this directory resolves members against.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Subscribe a connection to a channel, replacing any prior membership.
    ///
    /// Returns the channel the connection left, if it switched.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is empty or the connection is
    /// not registered. No state changes in either case.
    pub fn subscribe(
        &self,
        channel_name: &str,
        id: ConnectionId,
    ) -> Result<Option<String>, DirectoryError> {
        if channel_name.is_empty() {
            return Err(DirectoryError::InvalidChannelName);
        }

        let previous = self
            .registry
            .update(id, |entry| {
                let previous = entry.channel.replace(channel_name.to_string());
                if let Some(prev) = previous.as_deref() {
                    if prev != channel_name {
                        self.leave(prev, id);
                    }
                }

                self.channels
                    .entry(channel_name.to_string())
                    .or_insert_with(|| {
                        debug!(channel = %channel_name, "Creating channel membership");
                        HashSet::new()
                    })
                    .insert(id);

                previous.filter(|prev| prev != channel_name)
            })
            .ok_or(DirectoryError::UnknownConnection(id))?;

        debug!(
            channel = %channel_name,
            connection = %id,
            previous = ?previous,
            subscribers = self.subscriber_count(channel_name),
            "Subscribed"
        );

        Ok(previous)
    }

    /// Remove a connection from whatever channel it belongs to.
    ///
    /// Returns the channel it left.
    pub fn unsubscribe_all(&self, id: ConnectionId) -> Option<String> {
        let left = self
            .registry
            .update(id, |entry| {
                entry.channel.take().map(|name| {
                    self.leave(&name, id);
                    name
                })
            })
            .flatten();

        if let Some(channel) = &left {
            debug!(channel = %channel, connection = %id, "Unsubscribed");
        }
        left
    }

    /// Unregister a connection and purge its membership.
    ///
    /// Safe to call more than once; later calls return `None`.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        let snapshot = self.registry.remove(id)?;
        if let Some(channel) = &snapshot.channel {
            self.leave(channel, id);
        }
        Some(snapshot)
    }

    /// Drop a member from a channel, deleting the channel once it is empty.
    fn leave(&self, channel_name: &str, id: ConnectionId) {
        let removed = self.channels.remove_if_mut(channel_name, |_, members| {
            members.remove(&id);
            members.is_empty()
        });

        if removed.is_some() {
            debug!(channel = %channel_name, "Deleted empty channel");
        }
    }

    /// Deliver an encoded frame to every member except `exclude`.
    ///
    /// Members whose writer is gone are skipped silently; the liveness sweep
    /// cleans them up. Broadcasting to an unknown channel is a no-op.
    ///
    /// Returns the number of members the frame was queued for.
    pub fn broadcast(
        &self,
        channel_name: &str,
        payload: &Arc<str>,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let members: Vec<ConnectionId> = match self.channels.get(channel_name) {
            Some(members) => members.iter().copied().collect(),
            None => {
                trace!(channel = %channel_name, "Broadcast to channel without members");
                return 0;
            }
        };

        let delivered = members
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter(|id| self.registry.send(*id, Outbound::Text(Arc::clone(payload))))
            .count();

        trace!(channel = %channel_name, recipients = delivered, "Broadcast");
        delivered
    }

    /// Current members of a channel.
    #[must_use]
    pub fn members_of(&self, channel_name: &str) -> HashSet<ConnectionId> {
        self.channels
            .get(channel_name)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// Number of members of a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel_name: &str) -> usize {
        self.channels
            .get(channel_name)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Check if a channel has members.
    #[must_use]
    pub fn channel_exists(&self, channel_name: &str) -> bool {
        self.channels.contains_key(channel_name)
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Get directory statistics.
    #[must_use]
    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            channel_count: self.channels.len(),
            connection_count: self.registry.len(),
            total_subscriptions: self.channels.iter().map(|e| e.len()).sum(),
        }
    }

    /// Tear down: drop all membership and terminate every connection.
    pub fn clear(&self) {
        let drained = self.registry.drain();
        self.channels.clear();
        debug!(connections = drained, "Channel directory cleared");
    }
}

/// Directory statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectoryStats {
    /// Number of channels with at least one member.
    pub channel_count: usize,
    /// Number of registered connections.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}
