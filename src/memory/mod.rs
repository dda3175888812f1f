//! Memory Store
//!
//! Append-only, time-ordered records scoped by room. This is the only persistence
//! the orchestrator touches; phases communicate by appending records, never by
//! rewriting them.
//!
//! Two backends ship with the crate:
//! - [`InMemoryStore`]: process-local, used by tests and embedders
//! - [`SqliteMemoryStore`]: SQLite file, used by the binary

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::ids::{AgentId, RecordId, RoomId, UserId};

/// Source tag on every record the orchestrator creates
pub const SOURCE_TAG: &str = "github";

/// Payload of a memory record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Uuid>,
    /// Display name of the author, set on agent replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_reply_to(mut self, id: Uuid) -> Self {
        self.in_reply_to = Some(id);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// String field from metadata, if present
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// An immutable, timestamped unit of conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: RecordId,
    pub room_id: RoomId,
    /// Author of the record
    pub user_id: UserId,
    pub agent_id: AgentId,
    pub content: Content,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl MemoryRecord {
    /// Record with a random id, stamped now
    pub fn new(room_id: RoomId, user_id: UserId, agent_id: AgentId, content: Content) -> Self {
        Self {
            id: RecordId::new_random(),
            room_id,
            user_id,
            agent_id,
            content,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = id;
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Query over one room
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryQuery {
    pub room_id: RoomId,
    /// Maximum records to return (most recent first)
    pub count: Option<usize>,
    /// Inclusive lower bound on `created_at`
    pub start: Option<i64>,
    /// Inclusive upper bound on `created_at`
    pub end: Option<i64>,
}

impl MemoryQuery {
    pub fn room(room_id: RoomId) -> Self {
        Self {
            room_id,
            count: None,
            start: None,
            end: None,
        }
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Whether a record falls inside the time range
    pub fn in_range(&self, created_at: i64) -> bool {
        self.start.map_or(true, |s| created_at >= s) && self.end.map_or(true, |e| created_at <= e)
    }
}

/// Append/query interface over memory records
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append a record; records are never modified afterwards
    async fn append(&self, record: MemoryRecord) -> Result<()>;

    /// Records for a room, most recent first
    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>>;

    /// Most recent record of a room
    async fn latest(&self, room_id: RoomId) -> Result<Option<MemoryRecord>> {
        let mut records = self.query(&MemoryQuery::room(room_id).count(1)).await?;
        Ok(if records.is_empty() { None } else { Some(records.swap_remove(0)) })
    }
}

/// A user/room link registered with the runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub display_name: String,
    pub label: String,
    pub source: String,
}

impl Connection {
    /// Connection for a newly discovered user
    pub fn for_user(user_id: UserId, room_id: RoomId) -> Self {
        let name = format!("user{}", user_id);
        Self {
            user_id,
            room_id,
            display_name: name.clone(),
            label: name,
            source: SOURCE_TAG.to_string(),
        }
    }
}

/// Makes sure a user is a participant of a room before its process starts
#[async_trait]
pub trait ConnectionProvisioner: Send + Sync {
    /// Idempotent
    async fn ensure_connection(&self, connection: &Connection) -> Result<()>;
}
