use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;

use super::{Connection, ConnectionProvisioner, MemoryQuery, MemoryRecord, MemoryStore};
use crate::error::Result;

/// Process-local memory store
#[derive(Default)]
pub struct InMemoryStore {
    /// Insertion order doubles as the tie-breaker for equal timestamps
    records: RwLock<Vec<MemoryRecord>>,
    connections: RwLock<HashSet<Connection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records across all rooms
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.connections.read().iter().cloned().collect()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn append(&self, record: MemoryRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        let records = self.records.read();

        let mut matching: Vec<(usize, &MemoryRecord)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.room_id == query.room_id && query.in_range(r.created_at))
            .collect();

        // Most recent first; later insertion wins on equal timestamps
        matching.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));

        let limit = query.count.unwrap_or(usize::MAX);
        Ok(matching.into_iter().take(limit).map(|(_, r)| r.clone()).collect())
    }
}

#[async_trait]
impl ConnectionProvisioner for InMemoryStore {
    async fn ensure_connection(&self, connection: &Connection) -> Result<()> {
        self.connections.write().insert(connection.clone());
        Ok(())
    }
}
