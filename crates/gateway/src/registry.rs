//! Connection registry: live WebSocket connections indexed by id, owning
//! user, and subscribed organization.
//!
//! All three indices are guarded by one coarse reader/writer lock and only
//! move together inside a single critical section, so every connection id
//! reachable through `by_user` or `by_organization` always exists in
//! `by_id`. Socket writes never happen under the lock: fan-out snapshots
//! the target handles, releases the lock, then writes.

use crate::error::{RegistryError, Result as GatewayResult};
use crate::protocol::{EventMessage, ServerMessage};
use axum::extract::ws::Message;
use chrono::Utc;
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique connection identifier, fresh per registration, never reused.
pub type ConnectionId = Uuid;

/// Buffer size for per-connection outbound channels.
///
/// This bound is the slow-consumer policy: a client that falls more than
/// one buffer behind fails `try_send` and is evicted, so one stalled
/// socket can never hold up a broadcast.
pub const CONNECTION_CHANNEL_BUFFER_SIZE: usize = 256;

/// Write side of one live connection.
///
/// The channel feeds the connection's single writer task, which owns the
/// socket sink for the connection's lifetime; callers anywhere in the
/// process may send concurrently without touching the socket itself.
pub struct ConnectionHandle {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Authenticated principal that opened the connection.
    pub user_id: String,
    /// Channel to the connection's writer task.
    tx: mpsc::Sender<Message>,
    /// Timestamp when the connection registered (ms).
    pub connected_at: i64,
    /// Cancelled on eviction so the socket task shuts down instead of
    /// lingering after the registry has forgotten it.
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle for an authenticated principal.
    pub fn new(user_id: impl Into<String>, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            tx,
            connected_at: Utc::now().timestamp_millis(),
            cancel: CancellationToken::new(),
        }
    }

    /// Send a control message to this client.
    /// Non-blocking: fails if the buffer is full (slow client) or closed.
    pub fn send(&self, msg: &ServerMessage) -> GatewayResult<()> {
        let json = serde_json::to_string(msg)?;
        self.tx.try_send(Message::Text(json.into()))?;
        Ok(())
    }

    /// Try to send a raw message. Returns false if the buffer is full or
    /// the writer task is gone.
    pub fn try_send_raw(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Token cancelled when this connection is evicted.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct ConnectionEntry {
    handle: Arc<ConnectionHandle>,
    subscriptions: HashSet<String>,
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<ConnectionId, ConnectionEntry>,
    by_user: HashMap<String, HashSet<ConnectionId>>,
    by_organization: HashMap<String, HashSet<ConnectionId>>,
}

/// Process-wide registry of live connections.
///
/// Constructor-created and injected into the handshake handler and every
/// queue consumer; nothing reaches a socket except through it.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap()
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap()
    }

    /// Register a connection, indexing it by id and owning user.
    pub fn add(&self, handle: Arc<ConnectionHandle>) -> ConnectionId {
        let id = handle.id;
        let user_id = handle.user_id.clone();

        let mut inner = self.write();
        inner.by_user.entry(user_id.clone()).or_default().insert(id);
        inner.by_id.insert(
            id,
            ConnectionEntry {
                handle,
                subscriptions: HashSet::new(),
            },
        );
        drop(inner);

        info!(connection_id = %id, user_id = %user_id, "Connection registered");
        id
    }

    /// Remove a connection from every index. Idempotent: unknown ids are
    /// a no-op. Cancels the connection's token so its socket task exits.
    pub fn remove(&self, id: ConnectionId) {
        let mut inner = self.write();
        let Some(entry) = inner.by_id.remove(&id) else {
            return;
        };

        let user_id = entry.handle.user_id.clone();
        if let Some(connections) = inner.by_user.get_mut(&user_id) {
            connections.remove(&id);
            if connections.is_empty() {
                inner.by_user.remove(&user_id);
            }
        }
        for organization_id in &entry.subscriptions {
            if let Some(subscribers) = inner.by_organization.get_mut(organization_id) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    inner.by_organization.remove(organization_id);
                }
            }
        }
        drop(inner);

        entry.handle.cancel.cancel();
        info!(connection_id = %id, user_id = %user_id, "Connection removed");
    }

    /// Subscribe a connection to an organization's broadcasts.
    /// Idempotent. `ConnectionNotFound` means the connection is already
    /// gone; callers treat it as such.
    pub fn subscribe(&self, id: ConnectionId, organization_id: &str) -> Result<(), RegistryError> {
        let mut guard = self.write();
        let inner = &mut *guard;
        let entry = inner
            .by_id
            .get_mut(&id)
            .ok_or(RegistryError::ConnectionNotFound(id))?;

        if entry.subscriptions.insert(organization_id.to_string()) {
            inner
                .by_organization
                .entry(organization_id.to_string())
                .or_default()
                .insert(id);
            debug!(connection_id = %id, organization_id = %organization_id, "Subscribed");
        }
        Ok(())
    }

    /// Remove a connection's subscription to an organization.
    /// No-op if not subscribed; `ConnectionNotFound` for unknown ids.
    pub fn unsubscribe(&self, id: ConnectionId, organization_id: &str) -> Result<(), RegistryError> {
        let mut guard = self.write();
        let inner = &mut *guard;
        let entry = inner
            .by_id
            .get_mut(&id)
            .ok_or(RegistryError::ConnectionNotFound(id))?;

        if entry.subscriptions.remove(organization_id) {
            if let Some(subscribers) = inner.by_organization.get_mut(organization_id) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    inner.by_organization.remove(organization_id);
                }
            }
            debug!(connection_id = %id, organization_id = %organization_id, "Unsubscribed");
        }
        Ok(())
    }

    /// Deliver `message` to every connection subscribed to the
    /// organization. A failed write evicts that connection and never
    /// blocks delivery to its siblings.
    pub fn broadcast_to_organization(&self, organization_id: &str, message: &EventMessage) {
        let targets = {
            let inner = self.read();
            snapshot_targets(&inner, inner.by_organization.get(organization_id))
        };
        if targets.is_empty() {
            debug!(organization_id = %organization_id, "No subscribers for broadcast");
            return;
        }

        self.deliver(&targets, message);
        counter!("gateway_broadcasts_total").increment(1);
    }

    /// Deliver `message` to every connection owned by the user.
    /// `UserNotConnected` when the user has no live connections; the
    /// caller may persist the message for later delivery elsewhere.
    pub fn send_to_user(&self, user_id: &str, message: &EventMessage) -> Result<(), RegistryError> {
        let targets = {
            let inner = self.read();
            snapshot_targets(&inner, inner.by_user.get(user_id))
        };
        if targets.is_empty() {
            return Err(RegistryError::UserNotConnected(user_id.to_string()));
        }

        self.deliver(&targets, message);
        counter!("gateway_user_sends_total").increment(1);
        Ok(())
    }

    /// Write a pre-serialized event to a snapshot of handles, evicting
    /// every connection whose write fails.
    fn deliver(&self, targets: &[Arc<ConnectionHandle>], message: &EventMessage) {
        // Serialize once for the whole fan-out.
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize event message");
                return;
            }
        };

        let mut failed = Vec::new();
        for handle in targets {
            if handle.try_send_raw(Message::Text(json.clone().into())) {
                counter!("gateway_messages_sent_total").increment(1);
            } else {
                failed.push(handle.id);
            }
        }

        for id in failed {
            warn!(connection_id = %id, "Write failed, evicting connection");
            counter!("gateway_evictions_total").increment(1);
            self.remove(id);
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.read().by_id.len()
    }

    /// Total number of (connection, organization) subscription pairs.
    pub fn subscription_count(&self) -> usize {
        self.read()
            .by_id
            .values()
            .map(|entry| entry.subscriptions.len())
            .sum()
    }

    /// Check the cross-index invariant: every id in `by_user` or a
    /// `by_organization` bucket exists in `by_id`, and every subscription
    /// held by an entry appears in the matching organization bucket.
    #[cfg(test)]
    fn audit(&self) {
        let inner = self.read();
        for (user_id, ids) in &inner.by_user {
            assert!(!ids.is_empty(), "empty user bucket for {user_id}");
            for id in ids {
                let entry = inner.by_id.get(id).expect("by_user id missing from by_id");
                assert_eq!(&entry.handle.user_id, user_id);
            }
        }
        for (organization_id, ids) in &inner.by_organization {
            assert!(!ids.is_empty(), "empty organization bucket for {organization_id}");
            for id in ids {
                let entry = inner
                    .by_id
                    .get(id)
                    .expect("by_organization id missing from by_id");
                assert!(entry.subscriptions.contains(organization_id));
            }
        }
        for (id, entry) in &inner.by_id {
            assert!(inner
                .by_user
                .get(&entry.handle.user_id)
                .is_some_and(|ids| ids.contains(id)));
            for organization_id in &entry.subscriptions {
                assert!(inner
                    .by_organization
                    .get(organization_id)
                    .is_some_and(|ids| ids.contains(id)));
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Clone the handles for a bucket of connection ids while still holding
/// the read lock. Writes happen against this immutable snapshot, so
/// concurrent subscribe/unsubscribe on the same bucket cannot race the
/// write loop.
fn snapshot_targets(
    inner: &RegistryInner,
    ids: Option<&HashSet<ConnectionId>>,
) -> Vec<Arc<ConnectionHandle>> {
    ids.map(|ids| {
        ids.iter()
            .filter_map(|id| inner.by_id.get(id).map(|entry| entry.handle.clone()))
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str) -> EventMessage {
        EventMessage {
            event_type: event_type.to_string(),
            data: json!({"id": "x-1"}),
        }
    }

    fn connect(registry: &ConnectionRegistry, user_id: &str) -> (ConnectionId, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER_SIZE);
        let id = registry.add(Arc::new(ConnectionHandle::new(user_id, tx)));
        (id, rx)
    }

    fn recv_event_type(rx: &mut mpsc::Receiver<Message>) -> Option<String> {
        match rx.try_recv() {
            Ok(Message::Text(text)) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                Some(value["type"].as_str().unwrap().to_string())
            }
            _ => None,
        }
    }

    #[test]
    fn broadcast_reaches_subscriber_once() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = connect(&registry, "u1");
        registry.subscribe(id, "o1").unwrap();

        registry.broadcast_to_organization("o1", &event("task.created"));

        assert_eq!(recv_event_type(&mut rx).as_deref(), Some("task.created"));
        assert!(rx.try_recv().is_err(), "expected exactly one delivery");
        registry.audit();
    }

    #[test]
    fn send_to_user_reaches_every_tab() {
        let registry = ConnectionRegistry::new();
        let (_id1, mut rx1) = connect(&registry, "u1");
        let (_id2, mut rx2) = connect(&registry, "u1");

        registry.send_to_user("u1", &event("notification.created")).unwrap();

        assert!(recv_event_type(&mut rx1).is_some());
        assert!(recv_event_type(&mut rx2).is_some());
    }

    #[test]
    fn send_to_unconnected_user_is_not_found() {
        let registry = ConnectionRegistry::new();
        let result = registry.send_to_user("ghost", &event("notification.created"));
        assert!(matches!(result, Err(RegistryError::UserNotConnected(_))));
    }

    #[test]
    fn broadcast_after_remove_delivers_nothing() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = connect(&registry, "u1");
        registry.subscribe(id, "o1").unwrap();
        registry.remove(id);

        registry.broadcast_to_organization("o1", &event("task.created"));

        assert!(rx.try_recv().is_err());
        assert_eq!(registry.connection_count(), 0);
        registry.audit();
    }

    #[test]
    fn broadcast_is_isolated_by_organization() {
        let registry = ConnectionRegistry::new();
        let (id_a, mut rx_a) = connect(&registry, "u1");
        let (id_b, mut rx_b) = connect(&registry, "u2");
        registry.subscribe(id_a, "oA").unwrap();
        registry.subscribe(id_b, "oB").unwrap();

        registry.broadcast_to_organization("oA", &event("task.updated"));

        assert!(recv_event_type(&mut rx_a).is_some());
        assert!(rx_b.try_recv().is_err(), "oB-only connection must not receive oA events");
    }

    #[test]
    fn subscribe_unknown_connection_is_not_found() {
        let registry = ConnectionRegistry::new();
        let ghost = Uuid::new_v4();
        assert_eq!(
            registry.subscribe(ghost, "o1"),
            Err(RegistryError::ConnectionNotFound(ghost))
        );
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.subscription_count(), 0);
    }

    #[test]
    fn subscribe_and_unsubscribe_are_idempotent() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = connect(&registry, "u1");

        registry.subscribe(id, "o1").unwrap();
        registry.subscribe(id, "o1").unwrap();
        assert_eq!(registry.subscription_count(), 1);

        registry.unsubscribe(id, "o1").unwrap();
        registry.unsubscribe(id, "o1").unwrap();
        assert_eq!(registry.subscription_count(), 0);
        registry.audit();
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = connect(&registry, "u1");
        registry.subscribe(id, "o1").unwrap();

        registry.remove(id);
        registry.remove(id);

        assert_eq!(registry.connection_count(), 0);
        registry.audit();
    }

    #[test]
    fn failed_write_evicts_only_the_dead_connection() {
        let registry = ConnectionRegistry::new();
        let (id_dead, rx_dead) = connect(&registry, "u1");
        let (id_live, mut rx_live) = connect(&registry, "u2");
        registry.subscribe(id_dead, "o1").unwrap();
        registry.subscribe(id_live, "o1").unwrap();

        // Closing the receive side makes every write to this connection fail.
        drop(rx_dead);

        registry.broadcast_to_organization("o1", &event("comment.created"));

        assert!(recv_event_type(&mut rx_live).is_some(), "sibling must still be delivered");
        assert_eq!(registry.connection_count(), 1);
        assert!(matches!(
            registry.subscribe(id_dead, "o1"),
            Err(RegistryError::ConnectionNotFound(_))
        ));
        registry.audit();
    }

    #[test]
    fn eviction_cancels_the_connection_token() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER_SIZE);
        let handle = Arc::new(ConnectionHandle::new("u1", tx));
        let token = handle.cancel_token();
        let id = registry.add(handle);

        assert!(!token.is_cancelled());
        registry.remove(id);
        assert!(token.is_cancelled());
    }

    #[test]
    fn indices_hold_after_mixed_operations() {
        let registry = ConnectionRegistry::new();
        let (id1, _rx1) = connect(&registry, "u1");
        let (id2, _rx2) = connect(&registry, "u1");
        let (id3, _rx3) = connect(&registry, "u2");

        registry.subscribe(id1, "o1").unwrap();
        registry.subscribe(id1, "o2").unwrap();
        registry.subscribe(id2, "o1").unwrap();
        registry.subscribe(id3, "o2").unwrap();
        registry.unsubscribe(id1, "o1").unwrap();
        registry.remove(id2);

        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.subscription_count(), 2);
        registry.audit();
    }
}
