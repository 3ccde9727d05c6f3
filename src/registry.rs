use futures_util::future::join_all;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::ServerMessage;

/* ---------------- connections ---------------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for ConnId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Handle to a peer: its id plus the queue its writer task drains.
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: ConnId,
    tx: mpsc::Sender<String>,
}

impl Connection {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { id: ConnId::new(), tx }
    }

    /// Queues one frame for this peer, waiting at most `deadline` for room.
    pub async fn send(&self, frame: String, deadline: Duration) -> Result<(), TransportError> {
        self.tx.send_timeout(frame, deadline).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Timeout(_) => TransportError::Timeout(self.id),
            mpsc::error::SendTimeoutError::Closed(_)  => TransportError::Closed(self.id),
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(ConnId),

    #[error("connection {0} did not accept the frame in time")]
    Timeout(ConnId),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: Vec<ConnId>,
}

/* ---------------- registry ---------------- */
/// Room id -> live connections. Holds no buffer state.
pub struct ConnectionRegistry {
    rooms: RwLock<HashMap<String, HashMap<ConnId, Connection>>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self { rooms: RwLock::new(HashMap::new()), send_timeout }
    }

    pub fn send_timeout(&self) -> Duration { self.send_timeout }

    /// Adds `conn` to `room_id`, creating the room's set on first join.
    /// Returns the member count after the join.
    pub async fn join(&self, room_id: &str, conn: Connection) -> usize {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room_id.to_string()).or_default();
        let id = conn.id;
        members.insert(id, conn);
        let count = members.len();
        tracing::info!(room = %room_id, conn = %id, count, "connection joined");
        count
    }

    /// Removes `conn_id` from `room_id`. Removing an absent connection is a
    /// logged no-op. The room's entry is dropped once it has no members.
    pub async fn leave(&self, room_id: &str, conn_id: ConnId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room_id) else {
            tracing::debug!(room = %room_id, conn = %conn_id, "leave: room has no live members");
            return false;
        };
        if members.remove(&conn_id).is_none() {
            tracing::debug!(room = %room_id, conn = %conn_id, "leave: connection not registered");
            return false;
        }

        let remaining = members.len();
        if remaining == 0 {
            rooms.remove(room_id);
            tracing::info!(room = %room_id, conn = %conn_id, "last connection left, room entry dropped");
        } else {
            tracing::info!(room = %room_id, conn = %conn_id, count = remaining, "connection left");
        }
        true
    }

    /// Sends `frame` to every member of `room_id` except `exclude`.
    /// Members whose send fails are removed; the failure is reported, never returned.
    pub async fn broadcast(
        &self,
        room_id: &str,
        frame: &str,
        exclude: Option<ConnId>,
    ) -> BroadcastReport {
        let targets: Vec<Connection> = {
            let rooms = self.rooms.read().await;
            let Some(members) = rooms.get(room_id) else {
                tracing::debug!(room = %room_id, "broadcast to room without members");
                return BroadcastReport::default();
            };
            members
                .values()
                .filter(|c| Some(c.id) != exclude)
                .cloned()
                .collect()
        };
        self.fan_out(room_id, &targets, frame).await
    }

    /// Sends `user_count` to every member. The count and the member list come
    /// from the same read of the map. Returns the count sent, `None` for an
    /// empty room.
    pub async fn broadcast_count(&self, room_id: &str) -> Option<usize> {
        let (count, targets): (usize, Vec<Connection>) = {
            let rooms = self.rooms.read().await;
            let members = rooms.get(room_id).filter(|m| !m.is_empty())?;
            (members.len(), members.values().cloned().collect())
        };
        let frame = ServerMessage::UserCount { count }.encode();
        self.fan_out(room_id, &targets, &frame).await;
        Some(count)
    }

    async fn fan_out(&self, room_id: &str, targets: &[Connection], frame: &str) -> BroadcastReport {
        let deadline = self.send_timeout;
        let results = join_all(targets.iter().map(|c| c.send(frame.to_string(), deadline))).await;

        let mut report = BroadcastReport::default();
        for res in results {
            match res {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(room = %room_id, error = %e, "dropping connection after failed send");
                    report.dropped.push(match e {
                        TransportError::Closed(id) | TransportError::Timeout(id) => id,
                    });
                }
            }
        }

        for id in &report.dropped {
            self.leave(room_id, *id).await;
        }
        report
    }

    /// Live members of `room_id`; 0 when nobody is connected.
    pub async fn count(&self, room_id: &str) -> usize {
        self.rooms.read().await.get(room_id).map_or(0, HashMap::len)
    }

    pub async fn all_active_rooms(&self) -> HashSet<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    pub async fn total_connections(&self) -> usize {
        self.rooms.read().await.values().map(HashMap::len).sum()
    }
}
