//! Repository artifacts held in memory
//!
//! Collaborators store repository files, issues and pull requests as ordinary room
//! records tagged through `content.metadata`. This module finds them again and
//! projects them into the text blobs carried by [`ConversationState`].
//!
//! [`ConversationState`]: crate::state::ConversationState

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::ids::UserId;
use crate::memory::MemoryRecord;

/// `metadata.type` of an issue record
pub const KIND_ISSUE: &str = "issue";
/// `metadata.type` of a pull request record
pub const KIND_PULL_REQUEST: &str = "pull_request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    File,
    Issue,
    PullRequest,
}

impl ArtifactKind {
    /// Classify a record; `None` for plain conversation
    pub fn of(record: &MemoryRecord) -> Option<Self> {
        match record.content.metadata_str("type") {
            Some(KIND_ISSUE) => return Some(Self::Issue),
            Some(KIND_PULL_REQUEST) => return Some(Self::PullRequest),
            _ => {}
        }
        record.content.metadata_str("path").map(|_| Self::File)
    }
}

fn of_kind(records: &[MemoryRecord], kind: ArtifactKind) -> Vec<&MemoryRecord> {
    records.iter().filter(|r| ArtifactKind::of(r) == Some(kind)).collect()
}

pub fn files(records: &[MemoryRecord]) -> Vec<&MemoryRecord> {
    of_kind(records, ArtifactKind::File)
}

pub fn issues(records: &[MemoryRecord]) -> Vec<&MemoryRecord> {
    of_kind(records, ArtifactKind::Issue)
}

pub fn pull_requests(records: &[MemoryRecord]) -> Vec<&MemoryRecord> {
    of_kind(records, ArtifactKind::PullRequest)
}

fn meta(record: &MemoryRecord, key: &str) -> Value {
    record
        .content
        .metadata
        .as_ref()
        .and_then(|m| m.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

#[derive(Serialize)]
struct FileView<'a> {
    path: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct IssueView<'a> {
    title: &'a str,
    body: Value,
    url: Value,
    number: Value,
    state: Value,
}

#[derive(Serialize)]
struct PullRequestView<'a> {
    title: &'a str,
    body: Value,
    url: Value,
    number: Value,
    state: Value,
    diff: Value,
    comments: Value,
}

/// Files as a pretty JSON array of `{path, content}`, or `None` when there are none
pub fn files_json(records: &[MemoryRecord]) -> Result<Option<String>> {
    let found = files(records);
    if found.is_empty() {
        return Ok(None);
    }
    let views: Vec<FileView<'_>> = found
        .iter()
        .map(|r| FileView {
            path: r.content.metadata_str("path").unwrap_or_default(),
            content: &r.content.text,
        })
        .collect();
    Ok(Some(serde_json::to_string_pretty(&views)?))
}

/// Issues as a pretty JSON array of `{title, body, url, number, state}`
pub fn previous_issues_json(records: &[MemoryRecord]) -> Result<String> {
    let views: Vec<IssueView<'_>> = issues(records)
        .into_iter()
        .map(|r| IssueView {
            title: &r.content.text,
            body: meta(r, "body"),
            url: meta(r, "url"),
            number: meta(r, "number"),
            state: meta(r, "state"),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&views)?)
}

/// Pull requests, as issues plus `diff` and `comments`
pub fn previous_prs_json(records: &[MemoryRecord]) -> Result<String> {
    let views: Vec<PullRequestView<'_>> = pull_requests(records)
        .into_iter()
        .map(|r| PullRequestView {
            title: &r.content.text,
            body: meta(r, "body"),
            url: meta(r, "url"),
            number: meta(r, "number"),
            state: meta(r, "state"),
            diff: meta(r, "diff"),
            comments: meta(r, "comments"),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&views)?)
}

/// Repository a snapshot is taken for
#[derive(Debug, Clone, Copy)]
pub struct SnapshotTarget<'a> {
    pub user_id: UserId,
    /// Latest room message; snapshots are stored next to it
    pub message: &'a MemoryRecord,
    pub owner: &'a str,
    pub repo: &'a str,
    pub branch: &'a str,
    /// Hosting platform token, if one is configured
    pub token: Option<&'a str>,
}

/// Copies existing issues and pull requests into memory
#[async_trait]
pub trait RepositorySnapshotter: Send + Sync {
    async fn save_issues(&self, target: &SnapshotTarget<'_>, limit: usize) -> Result<()>;

    async fn save_pull_requests(&self, target: &SnapshotTarget<'_>, limit: usize) -> Result<()>;
}

/// Snapshotter for deployments without a hosting platform connection
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSnapshotter;

#[async_trait]
impl RepositorySnapshotter for NoopSnapshotter {
    async fn save_issues(&self, target: &SnapshotTarget<'_>, limit: usize) -> Result<()> {
        debug!("Skipping issue snapshot for {}/{} (limit {})", target.owner, target.repo, limit);
        Ok(())
    }

    async fn save_pull_requests(&self, target: &SnapshotTarget<'_>, limit: usize) -> Result<()> {
        debug!("Skipping pull request snapshot for {}/{} (limit {})", target.owner, target.repo, limit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AgentId, RoomId};
    use crate::memory::Content;
    use serde_json::json;

    fn record(text: &str, metadata: Option<Value>) -> MemoryRecord {
        let agent = AgentId::from_name("steward");
        let user = UserId::from_name("ivy");
        let mut content = Content::text(text);
        content.metadata = metadata;
        MemoryRecord::new(RoomId::for_user(agent, user), user, agent, content)
    }

    fn sample() -> Vec<MemoryRecord> {
        vec![
            record("hello", None),
            record("fn main() {}", Some(json!({"path": "src/main.rs"}))),
            record("Crash on start", Some(json!({"type": "issue", "number": 7, "state": "open", "url": "u7", "body": "boom"}))),
            record("Fix crash", Some(json!({"type": "pull_request", "number": 8, "diff": "+ok", "comments": []}))),
        ]
    }

    #[test]
    fn test_classification() {
        let records = sample();
        assert_eq!(ArtifactKind::of(&records[0]), None);
        assert_eq!(files(&records).len(), 1);
        assert_eq!(issues(&records).len(), 1);
        assert_eq!(pull_requests(&records).len(), 1);
    }

    #[test]
    fn test_projections() {
        let records = sample();

        let files: Value = serde_json::from_str(&files_json(&records).unwrap().unwrap()).unwrap();
        assert_eq!(files[0]["path"], "src/main.rs");

        let issues: Value = serde_json::from_str(&previous_issues_json(&records).unwrap()).unwrap();
        assert_eq!(issues, json!([{"title": "Crash on start", "body": "boom", "url": "u7", "number": 7, "state": "open"}]));

        let prs: Value = serde_json::from_str(&previous_prs_json(&records).unwrap()).unwrap();
        assert_eq!(prs[0]["diff"], "+ok");
        assert_eq!(prs[0]["body"], Value::Null);
    }

    #[test]
    fn test_no_files() {
        let records = vec![record("hello", None)];
        assert!(files_json(&records).unwrap().is_none());
        assert_eq!(previous_issues_json(&records).unwrap(), "[]");
    }
}
