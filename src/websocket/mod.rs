//! Presence and room registry.
//!
//! Tracks which live connections are subscribed to which conversations, and
//! which connections belong to which user (multi-tab, multi-device). This is
//! the only concurrently-mutated shared state in the service; every mutation
//! goes through the methods here, behind one lock. Callers must not hold the
//! lock across database I/O: persist first, then broadcast the result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod events;
pub mod message_types;
pub mod normalize;
pub mod session;

/// Unique identifier for a live connection.
///
/// Each WebSocket connection gets its own id at registration, so one browser
/// tab can be cleaned up without touching the user's other tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

struct Connection {
    user_id: Uuid,
    sender: UnboundedSender<String>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Connection>,
    // conversation id -> connections joined to that room
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
    // user id -> all of that user's live connections
    users: HashMap<Uuid, HashSet<ConnectionId>>,
    // (conversation id, user id) -> typing indicator deadline
    typing: HashMap<(Uuid, Uuid), Instant>,
}

impl RegistryInner {
    /// Remove one connection from every structure it appears in.
    fn drop_connection(&mut self, connection_id: ConnectionId) {
        if let Some(connection) = self.connections.remove(&connection_id) {
            for room in &connection.rooms {
                if let Some(members) = self.rooms.get_mut(room) {
                    members.remove(&connection_id);
                    if members.is_empty() {
                        self.rooms.remove(room);
                    }
                }
            }
            if let Some(conns) = self.users.get_mut(&connection.user_id) {
                conns.remove(&connection_id);
                if conns.is_empty() {
                    self.users.remove(&connection.user_id);
                }
            }
        }
    }
}

/// Shared registry of rooms, connections, and ephemeral typing state.
#[derive(Default, Clone)]
pub struct RoomRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new authenticated connection. Returns its id and the
    /// receiving end of its delivery channel.
    pub async fn register(&self, user_id: Uuid) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let connection_id = ConnectionId::new();

        let mut guard = self.inner.write().await;
        guard.connections.insert(
            connection_id,
            Connection {
                user_id,
                sender: tx,
                rooms: HashSet::new(),
            },
        );
        guard.users.entry(user_id).or_default().insert(connection_id);

        tracing::debug!(?connection_id, %user_id, "connection registered");
        (connection_id, rx)
    }

    /// Full teardown for a closed connection: every room, the user map, and
    /// the delivery channel, in one pass. Must run on every disconnect to
    /// avoid ghost broadcasts to dead sockets.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        let mut guard = self.inner.write().await;
        guard.drop_connection(connection_id);
        tracing::debug!(?connection_id, "connection unregistered");
    }

    /// Subscribe a connection to a conversation's room. Idempotent. Returns
    /// false when the connection is gone (already disconnected).
    ///
    /// Membership authorization happens at the gateway before this call; the
    /// registry itself holds no database handle.
    pub async fn join(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        match inner.connections.get_mut(&connection_id) {
            Some(connection) => {
                connection.rooms.insert(conversation_id);
                inner
                    .rooms
                    .entry(conversation_id)
                    .or_default()
                    .insert(connection_id);
                true
            }
            None => false,
        }
    }

    /// Unsubscribe a connection from a room. Idempotent.
    pub async fn leave(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        let mut guard = self.inner.write().await;
        if let Some(connection) = guard.connections.get_mut(&connection_id) {
            connection.rooms.remove(&conversation_id);
        }
        if let Some(members) = guard.rooms.get_mut(&conversation_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                guard.rooms.remove(&conversation_id);
            }
        }
    }

    pub async fn is_joined(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard
            .rooms
            .get(&conversation_id)
            .is_some_and(|members| members.contains(&connection_id))
    }

    /// All live connections belonging to one user, for building exclusion
    /// sets ("everyone but the typist's own tabs").
    pub async fn connections_of(&self, user_id: Uuid) -> HashSet<ConnectionId> {
        let guard = self.inner.read().await;
        guard.users.get(&user_id).cloned().unwrap_or_default()
    }

    /// Deliver `payload` to every connection in the room except those in
    /// `exclude`, exactly once each, in a single pass over the member set.
    ///
    /// Exclusion must happen here, not by issuing one broadcast per excluded
    /// connection: per-sender broadcast loops corrupt fan-out as soon as a
    /// room holds several participants with different exclusion sets.
    ///
    /// Connections whose channel is gone are dropped from the registry during
    /// the same pass; a failed delivery never blocks the remaining members.
    pub async fn broadcast(
        &self,
        conversation_id: Uuid,
        payload: &str,
        exclude: &HashSet<ConnectionId>,
    ) -> usize {
        let mut guard = self.inner.write().await;

        let members: Vec<ConnectionId> = match guard.rooms.get(&conversation_id) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut dead: Vec<ConnectionId> = Vec::new();

        for connection_id in members {
            if exclude.contains(&connection_id) {
                continue;
            }
            match guard.connections.get(&connection_id) {
                Some(connection) => {
                    if connection.sender.send(payload.to_string()).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push(connection_id);
                    }
                }
                None => dead.push(connection_id),
            }
        }

        for connection_id in dead {
            tracing::debug!(?connection_id, "dropping dead connection during broadcast");
            guard.drop_connection(connection_id);
        }

        delivered
    }

    pub async fn room_size(&self, conversation_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard
            .rooms
            .get(&conversation_id)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Record (or refresh) a typing indicator with its expiry deadline.
    pub async fn set_typing(&self, conversation_id: Uuid, user_id: Uuid, ttl: Duration) {
        let mut guard = self.inner.write().await;
        guard
            .typing
            .insert((conversation_id, user_id), Instant::now() + ttl);
    }

    /// Clear a typing indicator. Returns whether one was active.
    pub async fn clear_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        guard.typing.remove(&(conversation_id, user_id)).is_some()
    }

    /// Remove and return every typing indicator past its deadline.
    pub async fn take_expired_typing(&self) -> Vec<(Uuid, Uuid)> {
        let now = Instant::now();
        let mut guard = self.inner.write().await;
        let expired: Vec<(Uuid, Uuid)> = guard
            .typing
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            guard.typing.remove(key);
        }
        expired
    }
}

/// Background task expiring typing indicators whose `typing_stop` never
/// arrived (dropped connections, crashed tabs). Broadcasts `typing:stop` to
/// the room, excluding the typist's own connections, within one sweep
/// interval of the deadline.
pub async fn start_typing_sweeper(registry: RoomRegistry, sweep_interval: Duration) {
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        ticker.tick().await;
        for (conversation_id, user_id) in registry.take_expired_typing().await {
            let exclude = registry.connections_of(user_id).await;
            let event = events::GatewayEvent::TypingStop {
                conversation_id,
                user_id,
            };
            match event.to_payload() {
                Ok(payload) => {
                    registry.broadcast(conversation_id, &payload, &exclude).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize typing expiry event");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_joined_connections() {
        let registry = RoomRegistry::new();
        let conversation = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let (conn_a, mut rx_a) = registry.register(alice).await;
        let (conn_b, mut rx_b) = registry.register(bob).await;
        registry.join(conn_a, conversation).await;
        registry.join(conn_b, conversation).await;

        let delivered = registry
            .broadcast(conversation, "hello", &HashSet::new())
            .await;

        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut rx_a).await, vec!["hello"]);
        assert_eq!(drain(&mut rx_b).await, vec!["hello"]);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_given_set_but_hits_same_users_other_tabs() {
        let registry = RoomRegistry::new();
        let conversation = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        // Alice has two tabs; only the originating one is excluded.
        let (alice_tab1, mut rx_tab1) = registry.register(alice).await;
        let (alice_tab2, mut rx_tab2) = registry.register(alice).await;
        let (bob_conn, mut rx_bob) = registry.register(bob).await;
        for conn in [alice_tab1, alice_tab2, bob_conn] {
            registry.join(conn, conversation).await;
        }

        let exclude: HashSet<ConnectionId> = [alice_tab1].into_iter().collect();
        let delivered = registry.broadcast(conversation, "msg", &exclude).await;

        assert_eq!(delivered, 2);
        assert!(drain(&mut rx_tab1).await.is_empty());
        assert_eq!(drain(&mut rx_tab2).await, vec!["msg"]);
        assert_eq!(drain(&mut rx_bob).await, vec!["msg"]);
    }

    #[tokio::test]
    async fn test_broadcast_excluding_all_user_connections() {
        let registry = RoomRegistry::new();
        let conversation = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (alice_tab1, mut rx_tab1) = registry.register(alice).await;
        let (alice_tab2, mut rx_tab2) = registry.register(alice).await;
        let (bob_conn, mut rx_bob) = registry.register(bob).await;
        for conn in [alice_tab1, alice_tab2, bob_conn] {
            registry.join(conn, conversation).await;
        }

        // Typing events exclude every one of the typist's connections.
        let exclude = registry.connections_of(alice).await;
        let delivered = registry.broadcast(conversation, "typing", &exclude).await;

        assert_eq!(delivered, 1);
        assert!(drain(&mut rx_tab1).await.is_empty());
        assert!(drain(&mut rx_tab2).await.is_empty());
        assert_eq!(drain(&mut rx_bob).await, vec!["typing"]);
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let registry = RoomRegistry::new();
        let conversation = Uuid::new_v4();
        let (conn, mut rx) = registry.register(Uuid::new_v4()).await;

        registry.join(conn, conversation).await;
        registry.join(conn, conversation).await;

        assert_eq!(registry.room_size(conversation).await, 1);
        registry
            .broadcast(conversation, "once", &HashSet::new())
            .await;
        assert_eq!(drain(&mut rx).await, vec!["once"]);
    }

    #[tokio::test]
    async fn test_unregister_cleans_every_room_and_user_entry() {
        let registry = RoomRegistry::new();
        let user = Uuid::new_v4();
        let (room_a, room_b) = (Uuid::new_v4(), Uuid::new_v4());

        let (conn, _rx) = registry.register(user).await;
        registry.join(conn, room_a).await;
        registry.join(conn, room_b).await;

        registry.unregister(conn).await;

        assert_eq!(registry.room_size(room_a).await, 0);
        assert_eq!(registry.room_size(room_b).await, 0);
        assert!(registry.connections_of(user).await.is_empty());
        assert!(!registry.join(conn, room_a).await);
    }

    #[tokio::test]
    async fn test_broadcast_drops_dead_connections() {
        let registry = RoomRegistry::new();
        let conversation = Uuid::new_v4();
        let (conn_live, mut rx_live) = registry.register(Uuid::new_v4()).await;
        let (conn_dead, rx_dead) = registry.register(Uuid::new_v4()).await;
        registry.join(conn_live, conversation).await;
        registry.join(conn_dead, conversation).await;

        drop(rx_dead);

        let delivered = registry
            .broadcast(conversation, "ping", &HashSet::new())
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx_live).await, vec!["ping"]);
        assert_eq!(registry.room_size(conversation).await, 1);
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let registry = RoomRegistry::new();
        let conversation = Uuid::new_v4();
        let (conn, mut rx) = registry.register(Uuid::new_v4()).await;
        registry.join(conn, conversation).await;
        registry.leave(conn, conversation).await;

        let delivered = registry
            .broadcast(conversation, "gone", &HashSet::new())
            .await;

        assert_eq!(delivered, 0);
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_typing_expiry() {
        let registry = RoomRegistry::new();
        let conversation = Uuid::new_v4();
        let user = Uuid::new_v4();

        registry
            .set_typing(conversation, user, Duration::from_millis(5))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let expired = registry.take_expired_typing().await;
        assert_eq!(expired, vec![(conversation, user)]);

        // Consumed; a second sweep returns nothing.
        assert!(registry.take_expired_typing().await.is_empty());
    }

    #[tokio::test]
    async fn test_typing_stop_clears_indicator_before_expiry() {
        let registry = RoomRegistry::new();
        let conversation = Uuid::new_v4();
        let user = Uuid::new_v4();

        registry
            .set_typing(conversation, user, Duration::from_secs(10))
            .await;
        assert!(registry.clear_typing(conversation, user).await);
        assert!(!registry.clear_typing(conversation, user).await);
        assert!(registry.take_expired_typing().await.is_empty());
    }
}
