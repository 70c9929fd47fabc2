//! Registry of live connections.
//!
//! Each connection owns the sending half of its outbound queue; the writer
//! task holding the receiving half forwards items to the socket.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Atomic counter for connection handles.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Runtime handle of a connection. Unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Mint a fresh handle.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An item queued for a connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded text frame. Shared between all recipients of a broadcast.
    Text(Arc<str>),
    /// Liveness probe.
    Ping,
    /// Close the socket and stop.
    Terminate,
}

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// Per-connection state.
#[derive(Debug)]
pub(crate) struct ConnectionEntry {
    outbox: Outbox,
    alive: bool,
    /// The single channel this connection is subscribed to.
    pub(crate) channel: Option<String>,
    connected_at: Instant,
}

impl ConnectionEntry {
    fn snapshot(&self, id: ConnectionId) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id,
            alive: self.alive,
            channel: self.channel.clone(),
            connected_at: self.connected_at,
        }
    }
}

/// Read-only view of a registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub alive: bool,
    pub channel: Option<String>,
    pub connected_at: Instant,
}

/// Tracks every live connection.
///
/// All operations on unknown handles are no-ops.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. It starts out alive and unsubscribed.
    pub fn register(&self, outbox: Outbox) -> ConnectionId {
        let id = ConnectionId::next();
        self.connections.insert(
            id,
            ConnectionEntry {
                outbox,
                alive: true,
                channel: None,
                connected_at: Instant::now(),
            },
        );
        debug!(connection = %id, "Connection registered");
        id
    }

    /// Record a liveness acknowledgment.
    pub fn mark_alive(&self, id: ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            entry.alive = true;
            trace!(connection = %id, "Marked alive");
        }
    }

    /// Clear the liveness flag ahead of sending a probe.
    ///
    /// Returns the flag's previous value, or `None` for an unknown handle.
    pub fn mark_probe_sent(&self, id: ConnectionId) -> Option<bool> {
        self.connections
            .get_mut(&id)
            .map(|mut entry| std::mem::replace(&mut entry.alive, false))
    }

    /// Whether the connection answered the last probe.
    #[must_use]
    pub fn is_alive(&self, id: ConnectionId) -> bool {
        self.connections.get(&id).is_some_and(|entry| entry.alive)
    }

    /// Whether the connection is registered and its writer is still running.
    #[must_use]
    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|entry| !entry.outbox.is_closed())
    }

    /// Queue an item for the connection.
    ///
    /// Returns `false` if the handle is unknown or the writer has gone away.
    pub fn send(&self, id: ConnectionId, item: Outbound) -> bool {
        match self.connections.get(&id) {
            Some(entry) => entry.outbox.send(item).is_ok(),
            None => false,
        }
    }

    /// The channel the connection is currently subscribed to.
    #[must_use]
    pub fn current_channel(&self, id: ConnectionId) -> Option<String> {
        self.connections
            .get(&id)
            .and_then(|entry| entry.channel.clone())
    }

    /// Snapshot a connection's state.
    #[must_use]
    pub fn snapshot(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        self.connections.get(&id).map(|entry| entry.snapshot(id))
    }

    /// Remove a connection.
    ///
    /// Returns its final state so the caller can purge channel membership;
    /// `None` if it was already gone. Only the directory removes entries,
    /// so membership is always purged alongside.
    pub(crate) fn remove(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        let (_, entry) = self.connections.remove(&id)?;
        debug!(connection = %id, channel = ?entry.channel, "Connection removed");
        Some(entry.snapshot(id))
    }

    /// Run `f` on a connection's entry while holding its lock.
    pub(crate) fn update<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut ConnectionEntry) -> R,
    ) -> Option<R> {
        self.connections.get_mut(&id).map(|mut entry| f(&mut entry))
    }

    /// Handles of all registered connections.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Tell every connection to terminate and forget them all.
    ///
    /// Returns the number of connections drained.
    pub(crate) fn drain(&self) -> usize {
        let ids = self.ids();
        for id in &ids {
            if let Some((_, entry)) = self.connections.remove(id) {
                let _ = entry.outbox.send(Outbound::Terminate);
            }
        }
        debug!(count = ids.len(), "Registry drained");
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<Outbound>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_register_marks_alive() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = outbox();

        let id = registry.register(tx);
        assert!(registry.is_alive(id));
        assert!(registry.is_open(id));
        assert!(registry.current_channel(id).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_probe_cycle() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = outbox();
        let id = registry.register(tx);

        assert_eq!(registry.mark_probe_sent(id), Some(true));
        assert!(!registry.is_alive(id));
        assert_eq!(registry.mark_probe_sent(id), Some(false));

        registry.mark_alive(id);
        assert!(registry.is_alive(id));
    }

    #[test]
    fn test_unknown_handles_are_noops() {
        let registry = ConnectionRegistry::new();
        let ghost = ConnectionId::next();

        registry.mark_alive(ghost);
        assert_eq!(registry.mark_probe_sent(ghost), None);
        assert!(!registry.is_alive(ghost));
        assert!(!registry.send(ghost, Outbound::Ping));
        assert!(registry.remove(ghost).is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = outbox();
        let id = registry.register(tx);

        let snapshot = registry.remove(id).unwrap();
        assert_eq!(snapshot.id, id);
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_send_to_closed_writer() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = outbox();
        let id = registry.register(tx);

        assert!(registry.send(id, Outbound::Ping));
        drop(rx);
        assert!(!registry.is_open(id));
        assert!(!registry.send(id, Outbound::Ping));
    }

    #[test]
    fn test_drain_terminates_everyone() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = outbox();
        let (tx2, mut rx2) = outbox();
        registry.register(tx1);
        registry.register(tx2);

        assert_eq!(registry.drain(), 2);
        assert!(registry.is_empty());
        assert_eq!(rx1.try_recv().unwrap(), Outbound::Terminate);
        assert_eq!(rx2.try_recv().unwrap(), Outbound::Terminate);
    }
}
