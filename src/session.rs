use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{room_not_found, AppResult},
    protocol::ServerMessage,
    registry::{ConnId, Connection, ConnectionRegistry},
    store::RoomStore,
};

/// Where a persisted room stands with respect to live connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomPhase {
    /// Confirmed in storage, joiner not yet registered.
    Validated,
    Active,
    Idle,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied { delivered: usize },
    RoomGone,
    TooLarge { bytes: usize },
}

pub struct RoomSession {
    store: Arc<dyn RoomStore>,
    registry: Arc<ConnectionRegistry>,
    max_code_bytes: usize,
    // one lock per live room: write+relay and join+push never interleave
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RoomSession {
    pub fn new(store: Arc<dyn RoomStore>, registry: Arc<ConnectionRegistry>, max_code_bytes: usize) -> Self {
        Self { store, registry, max_code_bytes, gates: Mutex::new(HashMap::new()) }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> { &self.registry }

    pub async fn phase(&self, room_id: &str) -> AppResult<RoomPhase> {
        if self.store.get(room_id).await?.is_none() {
            return Err(room_not_found(room_id));
        }
        Ok(match self.registry.count(room_id).await {
            0 => RoomPhase::Idle,
            _ => RoomPhase::Active,
        })
    }

    /* ---------------- open ---------------- */

    /// Admits `conn` into `room_id`: the joiner gets the current buffer, then
    /// every member gets the new count. A missing room leaves the registry untouched.
    pub async fn open(&self, room_id: &str, conn: Connection) -> AppResult<ConnId> {
        if self.store.get(room_id).await?.is_none() {
            return Err(room_not_found(room_id));
        }
        tracing::debug!(room = %room_id, conn = %conn.id, phase = ?RoomPhase::Validated, "room validated");

        let admitted = self.admit(room_id, conn).await;
        if admitted.is_err() {
            self.prune_gate(room_id).await;
        }
        admitted
    }

    async fn admit(&self, room_id: &str, conn: Connection) -> AppResult<ConnId> {
        let _gate = self.gate(room_id).await;
        let id = conn.id;
        self.registry.join(room_id, conn.clone()).await;

        // Re-read after joining: any later update is relayed to this peer.
        let code = match self.store.get(room_id).await {
            Ok(Some(room)) => room.code,
            Ok(None) => {
                self.reject(room_id, id).await;
                return Err(room_not_found(room_id));
            }
            Err(e) => {
                self.reject(room_id, id).await;
                return Err(e.into());
            }
        };

        let snapshot = ServerMessage::CodeUpdate { code }.encode();
        if let Err(e) = conn.send(snapshot, self.registry.send_timeout()).await {
            tracing::warn!(room = %room_id, error = %e, "could not deliver initial buffer");
            self.reject(room_id, id).await;
            return Err(e.into());
        }

        self.registry.broadcast_count(room_id).await;
        Ok(id)
    }

    async fn reject(&self, room_id: &str, id: ConnId) {
        self.registry.leave(room_id, id).await;
        self.registry.broadcast_count(room_id).await;
    }

    /* ---------------- update ---------------- */

    /// Persists `code` and relays it to everyone but the sender.
    pub async fn apply_update(
        &self,
        room_id: &str,
        sender: ConnId,
        code: String,
        author: Option<&str>,
    ) -> AppResult<UpdateOutcome> {
        if code.len() > self.max_code_bytes {
            tracing::warn!(room = %room_id, conn = %sender, bytes = code.len(), "update exceeds size limit, dropped");
            return Ok(UpdateOutcome::TooLarge { bytes: code.len() });
        }

        let _gate = self.gate(room_id).await;
        let Some(room) = self.store.update_code(room_id, &code, author).await? else {
            return Ok(UpdateOutcome::RoomGone);
        };

        let frame = ServerMessage::CodeUpdate { code: room.code }.encode();
        let report = self.registry.broadcast(room_id, &frame, Some(sender)).await;
        tracing::debug!(room = %room_id, conn = %sender, delivered = report.delivered, "update relayed");
        Ok(UpdateOutcome::Applied { delivered: report.delivered })
    }

    /* ---------------- close ---------------- */

    pub async fn close(&self, room_id: &str, conn_id: ConnId) {
        let gate = self.gate(room_id).await;
        let left = self.registry.leave(room_id, conn_id).await;
        let remaining = self.registry.broadcast_count(room_id).await;
        tracing::debug!(room = %room_id, conn = %conn_id, left, remaining = remaining.unwrap_or(0), "connection closed");
        drop(gate);

        if remaining.is_none() {
            self.prune_gate(room_id).await;
        }
    }

    /// Forgets the room's gate once nobody holds or waits on it.
    async fn prune_gate(&self, room_id: &str) {
        let mut gates = self.gates.lock().await;
        if gates.get(room_id).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(room_id);
        }
    }

    async fn gate(&self, room_id: &str) -> OwnedMutexGuard<()> {
        let gate = self.gates.lock().await.entry(room_id.to_string()).or_default().clone();
        gate.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AppErr,
        models::{Language, Room, Snapshot},
        store::{test_support::BrokenStore, SqliteRoomStore, StorageError},
    };
    use async_trait::async_trait;
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };
    use tokio::sync::mpsc;

    async fn session() -> (RoomSession, Arc<dyn RoomStore>) {
        let store: Arc<dyn RoomStore> =
            Arc::new(SqliteRoomStore::connect("sqlite::memory:").await.expect("in-memory sqlite"));
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(100)));
        (RoomSession::new(store.clone(), registry, 1024), store)
    }

    fn peer() -> (Connection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (Connection::new(tx), rx)
    }

    fn parse(frame: String) -> ServerMessage {
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn open_missing_room_registers_nothing() {
        let (session, store) = session().await;
        let (conn, _rx) = peer();

        let err = session.open("missing", conn).await.unwrap_err();
        assert!(matches!(err, AppErr::NotFound(_)));
        assert_eq!(session.registry().count("missing").await, 0);
        assert!(session.registry().all_active_rooms().await.is_empty());
        assert!(store.get("missing").await.unwrap().is_none(), "no implicit create");
    }

    #[tokio::test]
    async fn joiner_gets_buffer_then_count() {
        let (session, store) = session().await;
        let room = store.create(Language::Python).await.unwrap();
        let (a, mut ra) = peer();

        session.open(&room.id, a).await.unwrap();

        assert_eq!(parse(ra.recv().await.unwrap()), ServerMessage::CodeUpdate { code: room.code.clone() });
        assert_eq!(parse(ra.recv().await.unwrap()), ServerMessage::UserCount { count: 1 });
        assert_eq!(session.phase(&room.id).await.unwrap(), RoomPhase::Active);
    }

    #[tokio::test]
    async fn update_reaches_others_once_and_not_sender() {
        let (session, store) = session().await;
        let room = store.create(Language::Python).await.unwrap();
        let (a, mut ra) = peer();
        let (b, mut rb) = peer();
        let a_id = session.open(&room.id, a).await.unwrap();
        session.open(&room.id, b).await.unwrap();

        // a: code_update, count 1, count 2   b: code_update, count 2
        for _ in 0..3 { ra.recv().await.unwrap(); }
        for _ in 0..2 { rb.recv().await.unwrap(); }

        let out = session.apply_update(&room.id, a_id, "x=1".into(), Some("a")).await.unwrap();
        assert_eq!(out, UpdateOutcome::Applied { delivered: 1 });

        assert_eq!(parse(rb.recv().await.unwrap()), ServerMessage::CodeUpdate { code: "x=1".into() });
        assert!(rb.try_recv().is_err());
        assert!(ra.try_recv().is_err());
        assert_eq!(store.get(&room.id).await.unwrap().unwrap().code, "x=1");
    }

    #[tokio::test]
    async fn close_notifies_remaining_member_once() {
        let (session, store) = session().await;
        let room = store.create(Language::Go).await.unwrap();
        let (a, mut ra) = peer();
        let (b, _rb) = peer();
        session.open(&room.id, a).await.unwrap();
        let b_id = session.open(&room.id, b).await.unwrap();
        for _ in 0..3 { ra.recv().await.unwrap(); }

        session.close(&room.id, b_id).await;

        assert_eq!(parse(ra.recv().await.unwrap()), ServerMessage::UserCount { count: 1 });
        assert!(ra.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_close_leaves_room_idle() {
        let (session, store) = session().await;
        let room = store.create(Language::Go).await.unwrap();
        let (a, _ra) = peer();
        let a_id = session.open(&room.id, a).await.unwrap();

        session.close(&room.id, a_id).await;
        assert_eq!(session.registry().count(&room.id).await, 0);
        assert_eq!(session.phase(&room.id).await.unwrap(), RoomPhase::Idle);
    }

    #[tokio::test]
    async fn interleaved_senders_last_write_wins() {
        let (session, store) = session().await;
        let room = store.create(Language::Python).await.unwrap();
        let (a, _ra) = peer();
        let (b, _rb) = peer();
        let a_id = session.open(&room.id, a).await.unwrap();
        let b_id = session.open(&room.id, b).await.unwrap();

        session.apply_update(&room.id, b_id, "X".into(), None).await.unwrap();
        session.apply_update(&room.id, a_id, "Y".into(), None).await.unwrap();

        assert_eq!(store.get(&room.id).await.unwrap().unwrap().code, "Y");
        let history = store.snapshots(&room.id).await.unwrap();
        assert_eq!(history.iter().map(|s| s.code.as_str()).collect::<Vec<_>>(), vec![room.code.as_str(), "X"]);
    }

    #[tokio::test]
    async fn oversized_update_is_dropped() {
        let (session, store) = session().await;
        let room = store.create(Language::Python).await.unwrap();
        let (a, _ra) = peer();
        let a_id = session.open(&room.id, a).await.unwrap();

        let out = session.apply_update(&room.id, a_id, "x".repeat(2048), None).await.unwrap();
        assert_eq!(out, UpdateOutcome::TooLarge { bytes: 2048 });
        assert!(store.snapshots(&room.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_after_delete_is_not_relayed() {
        let (session, store) = session().await;
        let room = store.create(Language::Python).await.unwrap();
        let (a, _ra) = peer();
        let (b, mut rb) = peer();
        let a_id = session.open(&room.id, a).await.unwrap();
        session.open(&room.id, b).await.unwrap();
        for _ in 0..2 { rb.recv().await.unwrap(); }

        store.delete(&room.id).await.unwrap();
        let out = session.apply_update(&room.id, a_id, "late".into(), None).await.unwrap();
        assert_eq!(out, UpdateOutcome::RoomGone);
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn storage_failure_surfaces_and_registers_nothing() {
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(100)));
        let session = RoomSession::new(Arc::new(BrokenStore), registry.clone(), 1024);
        let (a, _ra) = peer();

        let err = session.open("r", a.clone()).await.unwrap_err();
        assert!(matches!(err, AppErr::Storage(_)));
        assert_eq!(registry.count("r").await, 0);

        let err = session.apply_update("r", a.id, "x".into(), None).await.unwrap_err();
        assert!(matches!(err, AppErr::Storage(_)));
    }

    /// Commits and relays an edit right after the first lookup of a room,
    /// before the joiner is registered.
    struct EditAfterLookup {
        inner: SqliteRoomStore,
        registry: Arc<ConnectionRegistry>,
        fired: AtomicBool,
    }

    #[async_trait]
    impl RoomStore for EditAfterLookup {
        async fn get(&self, room_id: &str) -> Result<Option<Room>, StorageError> {
            let room = self.inner.get(room_id).await?;
            if room.is_some() && !self.fired.swap(true, Ordering::SeqCst) {
                self.inner.update_code(room_id, "NEW", None).await?;
                let frame = ServerMessage::CodeUpdate { code: "NEW".into() }.encode();
                self.registry.broadcast(room_id, &frame, None).await;
            }
            Ok(room)
        }
        async fn create(&self, language: Language) -> Result<Room, StorageError> {
            self.inner.create(language).await
        }
        async fn update_code(&self, room_id: &str, code: &str, author: Option<&str>) -> Result<Option<Room>, StorageError> {
            self.inner.update_code(room_id, code, author).await
        }
        async fn delete(&self, room_id: &str) -> Result<bool, StorageError> {
            self.inner.delete(room_id).await
        }
        async fn snapshots(&self, room_id: &str) -> Result<Vec<Snapshot>, StorageError> {
            self.inner.snapshots(room_id).await
        }
    }

    #[tokio::test]
    async fn joiner_sees_edit_committed_during_open() {
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(100)));
        let inner = SqliteRoomStore::connect("sqlite::memory:").await.unwrap();
        let room = inner.create(Language::Python).await.unwrap();
        let store = Arc::new(EditAfterLookup { inner, registry: registry.clone(), fired: AtomicBool::new(false) });
        let session = RoomSession::new(store.clone(), registry, 1024);
        let (a, mut ra) = peer();

        session.open(&room.id, a).await.unwrap();

        assert_eq!(parse(ra.recv().await.unwrap()), ServerMessage::CodeUpdate { code: "NEW".into() });
        assert_eq!(parse(ra.recv().await.unwrap()), ServerMessage::UserCount { count: 1 });
        assert!(ra.try_recv().is_err());
        assert_eq!(store.get(&room.id).await.unwrap().unwrap().code, "NEW");
    }

    #[tokio::test]
    async fn racing_updates_reach_peers_in_commit_order() {
        let (session, store) = session().await;
        let session = Arc::new(session);
        let room = store.create(Language::Python).await.unwrap();
        let (watcher, mut rw) = peer();
        session.open(&room.id, watcher).await.unwrap();
        for _ in 0..2 { rw.recv().await.unwrap(); }

        let mut handles = Vec::new();
        for i in 0..8 {
            let session = session.clone();
            let room_id = room.id.clone();
            handles.push(tokio::spawn(async move {
                session.apply_update(&room_id, ConnId::new(), format!("v{i}"), None).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut last = None;
        while let Ok(frame) = rw.try_recv() {
            last = Some(parse(frame));
        }
        let stored = store.get(&room.id).await.unwrap().unwrap().code;
        assert_eq!(last, Some(ServerMessage::CodeUpdate { code: stored }));
    }

    #[tokio::test]
    async fn gate_is_released_after_last_close() {
        let (session, store) = session().await;
        let room = store.create(Language::Go).await.unwrap();
        let (a, _ra) = peer();
        let a_id = session.open(&room.id, a).await.unwrap();
        assert!(session.gates.lock().await.contains_key(&room.id));

        session.close(&room.id, a_id).await;
        assert!(session.gates.lock().await.is_empty());

        let (b, _rb) = peer();
        assert!(session.open("missing", b).await.is_err());
        assert!(session.gates.lock().await.is_empty());
    }
}
