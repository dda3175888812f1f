//! Repo Steward
//!
//! Per-user background orchestration for a repository maintenance agent.
//!
//! # Features
//!
//! - **User Discovery**: one managed process per user posting into the join room
//! - **Per-User Workflow**: Discovery -> Initialization -> OODA, resumable by polling
//! - **Memory Store**: append-only room records (in-memory or SQLite)
//! - **Structured Extraction**: schema-validated objects from an external extractor
//! - **Action Registry**: named actions validated and executed against user state
//! - **Telemetry**: captured errors with identity context plus orchestration counters
//!
//! # Architecture
//!
//! ```text
//! join room ──► UserMonitor ──► ProcessRegistry ──► UserProcess (one per user)
//!                                                       │
//!                                                       ├── MemoryStore (records)
//!                                                       ├── StructuredExtractor (decisions)
//!                                                       ├── ActionRegistry (acts)
//!                                                       └── ErrorSink (captures)
//! ```

pub mod actions;
pub mod artifacts;
pub mod client;
pub mod config;
pub mod error;
pub mod extraction;
pub mod ids;
pub mod memory;
pub mod monitor;
pub mod process;
pub mod prompt;
pub mod registry;
pub mod schema;
pub mod sleeper;
pub mod state;
pub mod telemetry;

pub use actions::{Action, ActionCallback, ActionContext, ActionRegistry, RunReport};
pub use artifacts::{NoopSnapshotter, RepositorySnapshotter, SnapshotTarget};
pub use client::{StewardClient, StewardClientBuilder};
pub use config::{Config, Intervals, OrchestratorConfig, SnapshotLimits};
pub use error::{Result, StewardError};
pub use extraction::{RemoteExtractor, StructuredExtractor};
pub use ids::{AgentId, RecordId, RoomId, UserId};
pub use memory::{Connection, ConnectionProvisioner, Content, InMemoryStore, MemoryQuery, MemoryRecord, MemoryStore, SqliteMemoryStore};
pub use registry::{Phase, ProcessRegistry};
pub use schema::{ObjectSchema, ValidationError};
pub use state::ConversationState;
pub use telemetry::{ErrorContext, ErrorSink, RecordingErrorSink, StewardStats, TracingErrorSink};
