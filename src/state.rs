//! Conversation State
//!
//! Per-user working state: recent room history plus the repository configuration
//! and snapshots gathered along the way. Owned by that user's process while it runs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::ids::{AgentId, RoomId, UserId};
use crate::memory::{MemoryQuery, MemoryRecord, MemoryStore};

/// Recent messages kept in state
pub const DEFAULT_HISTORY_LENGTH: usize = 32;

/// Longest message rendered into history, in bytes
const MAX_RENDERED_MESSAGE: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub user_id: UserId,
    pub room_id: RoomId,
    /// Accumulated history, oldest first
    pub recent_messages: Vec<MemoryRecord>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub files: Option<String>,
    pub previous_issues: Option<String>,
    #[serde(rename = "previousPRs")]
    pub previous_prs: Option<String>,
    #[serde(skip, default = "default_history_length")]
    history_length: usize,
}

fn default_history_length() -> usize {
    DEFAULT_HISTORY_LENGTH
}

impl ConversationState {
    /// Empty state for a user's room
    pub fn new(agent_id: AgentId, agent_name: &str, user_id: UserId, room_id: RoomId) -> Self {
        Self {
            agent_id,
            agent_name: agent_name.to_string(),
            user_id,
            room_id,
            recent_messages: Vec::new(),
            owner: None,
            repo: None,
            branch: None,
            files: None,
            previous_issues: None,
            previous_prs: None,
            history_length: DEFAULT_HISTORY_LENGTH,
        }
    }

    pub fn with_history_length(mut self, length: usize) -> Self {
        self.history_length = length.max(1);
        self
    }

    /// Compose fresh state around `message`
    pub async fn compose(
        store: &dyn MemoryStore,
        message: &MemoryRecord,
        agent_name: &str,
    ) -> Result<Self> {
        let mut state = Self::new(message.agent_id, agent_name, message.user_id, message.room_id);
        state.update_recent(store).await?;
        Ok(state)
    }

    /// Merge the room's newest records into the history
    ///
    /// Records already held are kept as they are; only unseen ones are added.
    pub async fn update_recent(&mut self, store: &dyn MemoryStore) -> Result<usize> {
        let latest = store
            .query(&MemoryQuery::room(self.room_id).count(self.history_length))
            .await?;

        let mut added = 0;
        for record in latest {
            if !self.recent_messages.iter().any(|m| m.id == record.id) {
                self.recent_messages.push(record);
                added += 1;
            }
        }

        if added > 0 {
            self.recent_messages.sort_by_key(|m| m.created_at);
            let excess = self.recent_messages.len().saturating_sub(self.history_length);
            self.recent_messages.drain(..excess);
        }

        Ok(added)
    }

    /// Whether the owner/repo/branch triple is committed
    pub fn has_repository(&self) -> bool {
        self.owner.is_some() && self.repo.is_some() && self.branch.is_some()
    }

    /// Commit the repository triple
    pub fn set_repository(&mut self, owner: &str, repo: &str, branch: &str) {
        self.owner = Some(owner.to_string());
        self.repo = Some(repo.to_string());
        self.branch = Some(branch.to_string());
    }

    /// History rendered one line per message
    pub fn recent_messages_text(&self) -> String {
        let mut text = String::new();
        for msg in &self.recent_messages {
            let author = msg
                .content
                .user
                .clone()
                .unwrap_or_else(|| format!("user{}", msg.user_id));
            text.push_str(&author);
            text.push_str(": ");
            text.push_str(truncate_utf8(&msg.content.text, MAX_RENDERED_MESSAGE));
            if let Some(action) = &msg.content.action {
                text.push_str(&format!(" ({})", action));
            }
            text.push('\n');
        }
        text
    }

    /// Values available to prompt templates
    pub fn template_values(&self) -> HashMap<&'static str, String> {
        let mut values = HashMap::new();
        values.insert("agentName", self.agent_name.clone());
        values.insert("recentMessages", self.recent_messages_text());
        values.insert("owner", self.owner.clone().unwrap_or_default());
        values.insert("repo", self.repo.clone().unwrap_or_default());
        values.insert("branch", self.branch.clone().unwrap_or_default());
        values.insert("files", self.files.clone().unwrap_or_default());
        values.insert("previousIssues", self.previous_issues.clone().unwrap_or_default());
        values.insert("previousPRs", self.previous_prs.clone().unwrap_or_default());
        values
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let cut = s
        .char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= max)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &s[..cut]
}
