//! Identities
//!
//! Users, agents, rooms and records are all UUIDs. Rooms and core-created records
//! are derived with v5 hashing so the same inputs always give the same identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Deterministic UUID for an arbitrary string
pub fn string_to_uuid(value: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, value.as_bytes())
}

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_name(name: &str) -> Self {
                Self(string_to_uuid(name))
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_newtype!(
    /// A tracked user, discovered from join records
    UserId
);
uuid_newtype!(
    /// The agent running the orchestrator
    AgentId
);
uuid_newtype!(
    /// A conversation scope
    RoomId
);
uuid_newtype!(
    /// A single memory record
    RecordId
);

impl RoomId {
    /// Well-known room every user posts a join record into
    pub fn join_room(agent: AgentId) -> Self {
        Self::from_name(&format!("default-room-{}", agent))
    }

    /// Dedicated room for one user's conversation with the agent
    pub fn for_user(agent: AgentId, user: UserId) -> Self {
        Self::from_name(&format!("default-room-{}-{}", agent, user))
    }
}

impl RecordId {
    /// Traceable id for a record the orchestrator writes itself
    pub fn derive(room: RoomId, agent: AgentId, user: UserId, timestamp: i64, suffix: &str) -> Self {
        Self::from_name(&format!("{}-{}-{}-{}-{}", room, agent, user, timestamp, suffix))
    }
}
