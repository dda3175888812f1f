//! Error & Telemetry Sink
//!
//! Failures are captured here with whatever identity context is known at the
//! point of failure. Capturing never changes control flow.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

use crate::ids::{AgentId, RoomId, UserId};

/// Structured context attached to a captured error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub agent_id: Option<AgentId>,
    pub user_id: Option<UserId>,
    pub room_id: Option<RoomId>,
    pub character: Option<String>,
    /// Operation that failed (e.g. `discoverRepository`)
    pub action: Option<String>,
}

impl ErrorContext {
    pub fn agent(agent_id: AgentId) -> Self {
        Self {
            agent_id: Some(agent_id),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }

    pub fn character(mut self, name: &str) -> Self {
        self.character = Some(name.to_string());
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }
}

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Receives captured failures
pub trait ErrorSink: Send + Sync {
    fn capture(&self, message: &str, context: &ErrorContext);
}

/// Sink that emits one structured `error!` event per capture
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn capture(&self, message: &str, context: &ErrorContext) {
        error!(
            agent_id = %opt(&context.agent_id),
            user_id = %opt(&context.user_id),
            room_id = %opt(&context.room_id),
            character = %opt(&context.character),
            action = %opt(&context.action),
            "Captured error: {}",
            message
        );
    }
}

/// Sink that keeps every capture in memory
#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    captured: Mutex<Vec<(String, ErrorContext)>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<(String, ErrorContext)> {
        self.captured.lock().clone()
    }

    /// Captures whose message contains `needle`
    pub fn matching(&self, needle: &str) -> Vec<(String, ErrorContext)> {
        self.captured
            .lock()
            .iter()
            .filter(|(m, _)| m.contains(needle))
            .cloned()
            .collect()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn capture(&self, message: &str, context: &ErrorContext) {
        TracingErrorSink.capture(message, context);
        self.captured.lock().push((message.to_string(), context.clone()));
    }
}

/// Orchestration counters
#[derive(Debug, Default)]
pub struct StewardStats {
    pub users_started: AtomicU64,
    pub users_failed: AtomicU64,
    pub monitor_cycles: AtomicU64,
    pub discovery_cycles: AtomicU64,
    pub init_cycles: AtomicU64,
    pub ooda_cycles: AtomicU64,
    pub actions_announced: AtomicU64,
    pub errors_captured: AtomicU64,
}

impl StewardStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StewardStatsSnapshot {
        StewardStatsSnapshot {
            users_started: self.users_started.load(Ordering::Relaxed),
            users_failed: self.users_failed.load(Ordering::Relaxed),
            monitor_cycles: self.monitor_cycles.load(Ordering::Relaxed),
            discovery_cycles: self.discovery_cycles.load(Ordering::Relaxed),
            init_cycles: self.init_cycles.load(Ordering::Relaxed),
            ooda_cycles: self.ooda_cycles.load(Ordering::Relaxed),
            actions_announced: self.actions_announced.load(Ordering::Relaxed),
            errors_captured: self.errors_captured.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StewardStatsSnapshot {
    pub users_started: u64,
    pub users_failed: u64,
    pub monitor_cycles: u64,
    pub discovery_cycles: u64,
    pub init_cycles: u64,
    pub ooda_cycles: u64,
    pub actions_announced: u64,
    pub errors_captured: u64,
}
