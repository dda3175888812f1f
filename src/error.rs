//! Error types
//!
//! Transient conditions (no message yet, no files yet, a `NOTHING` decision) are not
//! errors and never show up here. Everything in [`StewardError`] is either captured and
//! skipped by the loop that hit it, or fatal to a single user's process.

use thiserror::Error;

use crate::schema::ValidationError;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, StewardError>;

#[derive(Debug, Error)]
pub enum StewardError {
    #[error("Memory store error: {0}")]
    Store(String),

    #[error("Schema validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("No message found, {0} cannot continue")]
    MissingSeedMessage(&'static str),

    #[error("Action `{name}` failed: {reason}")]
    Action { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StewardError {
    /// True for schema validation failures from the extraction step
    pub fn is_validation(&self) -> bool {
        matches!(self, StewardError::Validation(_))
    }
}
