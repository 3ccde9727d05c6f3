use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;

use crate::models::{Language, Room, Snapshot};

const ROOM_ID_ALPHABET: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];
const ROOM_ID_LEN: usize = 8;
const CREATE_ATTEMPTS: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),

    #[error("could not allocate a unique room id")]
    IdExhausted,
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn get(&self, room_id: &str) -> Result<Option<Room>, StorageError>;

    async fn create(&self, language: Language) -> Result<Room, StorageError>;

    /// Snapshots the current buffer, then replaces it with `code`.
    /// `None` when the room does not exist.
    async fn update_code(
        &self,
        room_id: &str,
        code: &str,
        author: Option<&str>,
    ) -> Result<Option<Room>, StorageError>;

    /// Removes the room and its snapshots. `false` when it did not exist.
    async fn delete(&self, room_id: &str) -> Result<bool, StorageError>;

    /// Snapshot history of a room, oldest first.
    async fn snapshots(&self, room_id: &str) -> Result<Vec<Snapshot>, StorageError>;
}

/* ---------------- rows ---------------- */
#[derive(sqlx::FromRow)]
struct RoomRow {
    id:         String,
    code:       String,
    language:   String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoomRow> for Room {
    fn from(r: RoomRow) -> Self {
        Room {
            id: r.id,
            code: r.code,
            language: Language::from(r.language),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id:              i64,
    room_id:         String,
    code:            String,
    timestamp:       DateTime<Utc>,
    user_identifier: Option<String>,
}

/* ---------------- sqlite ---------------- */
#[derive(Clone)]
pub struct SqliteRoomStore {
    pool: SqlitePool,
}

impl SqliteRoomStore {
    /// Opens the pool and makes sure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // An in-memory database lives and dies with its single connection.
        let mut pool_opts = SqlitePoolOptions::new().max_connections(5);
        if url.contains(":memory:") {
            pool_opts = pool_opts.max_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_opts.connect_with(opts).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id         TEXT PRIMARY KEY,
                code       TEXT NOT NULL,
                language   TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS code_snapshots (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id         TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                code            TEXT NOT NULL,
                timestamp       TEXT NOT NULL,
                user_identifier TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_room ON code_snapshots(room_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("database schema ready");
        Ok(())
    }
}

#[async_trait]
impl RoomStore for SqliteRoomStore {
    async fn get(&self, room_id: &str) -> Result<Option<Room>, StorageError> {
        let row: Option<RoomRow> = sqlx::query_as(
            "SELECT id, code, language, created_at, updated_at FROM rooms WHERE id = ?",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Room::from))
    }

    async fn create(&self, language: Language) -> Result<Room, StorageError> {
        let now = Utc::now();
        let code = language.template();

        for _ in 0..CREATE_ATTEMPTS {
            let id = nanoid::nanoid!(ROOM_ID_LEN, &ROOM_ID_ALPHABET);
            let res = sqlx::query(
                "INSERT INTO rooms (id, code, language, created_at, updated_at) VALUES (?,?,?,?,?)",
            )
            .bind(&id)
            .bind(&code)
            .bind(language.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await;

            match res {
                Ok(_) => {
                    tracing::info!(room = %id, %language, "room created");
                    return Ok(Room { id, code, language, created_at: now, updated_at: now });
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    tracing::debug!(room = %id, "room id taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::IdExhausted)
    }

    async fn update_code(
        &self,
        room_id: &str,
        code: &str,
        author: Option<&str>,
    ) -> Result<Option<Room>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // Write first: the transaction must hold the write lock before it reads.
        let copied = sqlx::query(
            "INSERT INTO code_snapshots (room_id, code, timestamp, user_identifier)
             SELECT id, code, ?, ? FROM rooms WHERE id = ?",
        )
        .bind(now)
        .bind(author)
        .bind(room_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if copied == 0 {
            tracing::warn!(room = %room_id, "update for missing room");
            return Ok(None);
        }

        let row: RoomRow = sqlx::query_as(
            "UPDATE rooms SET code = ?, updated_at = ? WHERE id = ?
             RETURNING id, code, language, created_at, updated_at",
        )
        .bind(code)
        .bind(now)
        .bind(room_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(room = %room_id, "code updated");
        Ok(Some(row.into()))
    }

    async fn delete(&self, room_id: &str) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM code_snapshots WHERE room_id = ?")
            .bind(room_id)
            .execute(&mut *tx)
            .await?;
        let gone = sqlx::query("DELETE FROM rooms WHERE id = ?")
            .bind(room_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        tx.commit().await?;

        if gone {
            tracing::info!(room = %room_id, "room deleted");
        }
        Ok(gone)
    }

    async fn snapshots(&self, room_id: &str) -> Result<Vec<Snapshot>, StorageError> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "SELECT id, room_id, code, timestamp, user_identifier FROM code_snapshots
             WHERE room_id = ? ORDER BY timestamp, id",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Snapshot {
                id: r.id,
                room_id: r.room_id,
                code: r.code,
                timestamp: r.timestamp,
                author: r.user_identifier,
            })
            .collect())
    }
}
