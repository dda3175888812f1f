use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection as SqlConnection};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Connection, ConnectionProvisioner, Content, MemoryQuery, MemoryRecord, MemoryStore};
use crate::error::{Result, StewardError};

/// SQLite-backed memory store
pub struct SqliteMemoryStore {
    conn: Mutex<SqlConnection>,
}

/// Raw row before identities are parsed
type RawRow = (String, String, String, String, String, i64);

impl SqliteMemoryStore {
    /// Open or create the memory database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StewardError::Store(format!("create {}: {}", parent.display(), e)))?;
        }

        let conn = SqlConnection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("Memory store opened: {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (nothing touches disk)
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(SqlConnection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                room_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memories_room_created
                ON memories(room_id, created_at DESC, seq DESC);

            CREATE TABLE IF NOT EXISTS participants (
                user_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                label TEXT NOT NULL,
                source TEXT NOT NULL,
                PRIMARY KEY (user_id, room_id)
            );
            "#,
        )?;

        Ok(())
    }

    /// Number of participants registered for a room
    pub fn participant_count(&self, room_id: &Uuid) -> Result<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM participants WHERE room_id = ?1",
            params![room_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn parse_row(row: RawRow) -> Result<MemoryRecord> {
        let (id, room_id, user_id, agent_id, content, created_at) = row;
        let uuid = |s: &str| {
            Uuid::parse_str(s).map_err(|e| StewardError::Store(format!("bad uuid `{}`: {}", s, e)))
        };
        let content: Content = serde_json::from_str(&content)?;

        Ok(MemoryRecord {
            id: uuid(&id)?.into(),
            room_id: uuid(&room_id)?.into(),
            user_id: uuid(&user_id)?.into(),
            agent_id: uuid(&agent_id)?.into(),
            content,
            created_at,
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn append(&self, record: MemoryRecord) -> Result<()> {
        let content = serde_json::to_string(&record.content)?;

        self.conn.lock().execute(
            "INSERT INTO memories (id, room_id, user_id, agent_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                record.room_id.to_string(),
                record.user_id.to_string(),
                record.agent_id.to_string(),
                content,
                record.created_at,
            ],
        )?;

        debug!("Appended memory {} to room {}", record.id, record.room_id);
        Ok(())
    }

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        let rows: Vec<RawRow> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, room_id, user_id, agent_id, content, created_at FROM memories
                 WHERE room_id = ?1 AND created_at >= ?2 AND created_at <= ?3
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?4",
            )?;

            let limit = query.count.map(|c| c as i64).unwrap_or(-1);
            let rows: Vec<RawRow> = stmt
                .query_map(
                    params![
                        query.room_id.to_string(),
                        query.start.unwrap_or(i64::MIN),
                        query.end.unwrap_or(i64::MAX),
                        limit,
                    ],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter().map(Self::parse_row).collect()
    }
}

#[async_trait]
impl ConnectionProvisioner for SqliteMemoryStore {
    async fn ensure_connection(&self, connection: &Connection) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO participants (user_id, room_id, display_name, label, source)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                connection.user_id.to_string(),
                connection.room_id.to_string(),
                connection.display_name,
                connection.label,
                connection.source,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AgentId, RoomId, UserId};
    use serde_json::json;
    use tempfile::TempDir;

    fn record(room: RoomId, text: &str, at: i64) -> MemoryRecord {
        MemoryRecord::new(room, UserId::from_name("u"), AgentId::from_name("a"), Content::text(text))
            .with_created_at(at)
    }

    #[tokio::test]
    async fn test_append_and_query_order() {
        let temp = TempDir::new().unwrap();
        let store = SqliteMemoryStore::open(&temp.path().join("memory.db")).unwrap();
        let room = RoomId::new_random();

        store.append(record(room, "old", 100)).await.unwrap();
        store.append(record(room, "new", 200)).await.unwrap();
        store.append(record(room, "tie", 200)).await.unwrap();

        let all = store.query(&MemoryQuery::room(room)).await.unwrap();
        let texts: Vec<_> = all.iter().map(|r| r.content.text.as_str()).collect();
        assert_eq!(texts, vec!["tie", "new", "old"]);

        let limited = store.query(&MemoryQuery::room(room).count(1)).await.unwrap();
        assert_eq!(limited.len(), 1);

        let ranged = store.query(&MemoryQuery::room(room).between(50, 150)).await.unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].content.text, "old");
    }

    #[tokio::test]
    async fn test_content_round_trips_metadata() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let room = RoomId::new_random();
        let content = Content::text("README.md")
            .with_action("CREATE_MEMORIES_FROM_FILES")
            .with_metadata(json!({"path": "README.md"}));
        let rec = MemoryRecord::new(room, UserId::from_name("u"), AgentId::from_name("a"), content);

        store.append(rec.clone()).await.unwrap();
        let latest = store.latest(room).await.unwrap().unwrap();
        assert_eq!(latest, rec);
        assert_eq!(latest.content.metadata_str("path"), Some("README.md"));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let rec = record(RoomId::new_random(), "once", 1);

        store.append(rec.clone()).await.unwrap();
        assert!(store.append(rec).await.is_err());
    }

    #[tokio::test]
    async fn test_participants_persist_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("memory.db");
        let room = RoomId::new_random();
        let conn = Connection::for_user(UserId::from_name("dave"), room);

        {
            let store = SqliteMemoryStore::open(&path).unwrap();
            store.ensure_connection(&conn).await.unwrap();
            store.ensure_connection(&conn).await.unwrap();
        }

        let store = SqliteMemoryStore::open(&path).unwrap();
        assert_eq!(store.participant_count(room.as_uuid()).unwrap(), 1);
    }
}
