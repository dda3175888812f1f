//! Action Registry
//!
//! Named operations executed against a trigger record and the user's state.
//! Dispatch is by name: each trigger record's `content.action` is looked up here,
//! validated, executed, and every result is handed to a callback.

pub mod builtin;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::memory::{Content, MemoryRecord};
use crate::state::ConversationState;

/// Directive asking the repository collaborator to initialise a checkout
pub const INITIALIZE_REPOSITORY: &str = "INITIALIZE_REPOSITORY";
/// Directive asking the repository collaborator to turn files into memories
pub const CREATE_MEMORIES_FROM_FILES: &str = "CREATE_MEMORIES_FROM_FILES";

/// What an action sees while it runs
pub struct ActionContext<'a> {
    /// Latest message of the room when the run started
    pub message: &'a MemoryRecord,
    /// Record naming this action
    pub trigger: &'a MemoryRecord,
    pub state: &'a ConversationState,
}

#[async_trait]
pub trait Action: Send + Sync {
    /// Unique name, upper snake case
    fn name(&self) -> &str;

    /// Alternative names the action answers to
    fn similes(&self) -> &[&str] {
        &[]
    }

    fn description(&self) -> &str {
        ""
    }

    /// Whether the action applies in this context
    async fn validate(&self, _ctx: &ActionContext<'_>) -> bool {
        true
    }

    /// Run the action, returning the contents of its replies
    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<Vec<Content>>;
}

/// Receives every result produced during a registry run
#[async_trait]
pub trait ActionCallback: Send {
    async fn on_result(&mut self, content: Content, state: &mut ConversationState) -> Result<()>;
}

/// Callback that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCallback;

#[async_trait]
impl ActionCallback for LogCallback {
    async fn on_result(&mut self, content: Content, _state: &mut ConversationState) -> Result<()> {
        info!("Callback called with content: {:?}", content);
        Ok(())
    }
}

/// Outcome of one registry run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Names of actions that executed successfully, in order
    pub executed: Vec<String>,
    /// Triggers with no action, an unknown action, or failed validation
    pub skipped: usize,
    /// Actions or callbacks that returned an error
    pub failed: usize,
}

/// Lookup of actions by name
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<dyn Action>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register actions, replacing any with the same name
    pub fn register(&self, actions: &[Arc<dyn Action>]) {
        let mut map = self.actions.write();
        for action in actions {
            info!("Registered action: {}", action.name());
            map.insert(action.name().to_uppercase(), Arc::clone(action));
        }
    }

    /// Unregister actions; absent names are ignored
    pub fn unregister(&self, actions: &[Arc<dyn Action>]) {
        let mut map = self.actions.write();
        for action in actions {
            if map.remove(&action.name().to_uppercase()).is_some() {
                debug!("Unregistered action: {}", action.name());
            }
        }
    }

    /// Find an action by name or simile, case-insensitively
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        let key = name.trim().to_uppercase();
        let map = self.actions.read();
        if let Some(action) = map.get(&key) {
            return Some(Arc::clone(action));
        }
        map.values()
            .find(|a| a.similes().iter().any(|s| s.eq_ignore_ascii_case(&key)))
            .cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.read().values().map(|a| a.name().to_string()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }

    /// Execute the action named by each trigger, in order, and wait for all of them
    ///
    /// A failing action or callback is logged and the remaining triggers still run.
    pub async fn run(
        &self,
        message: &MemoryRecord,
        triggers: &[MemoryRecord],
        state: &mut ConversationState,
        callback: &mut dyn ActionCallback,
    ) -> RunReport {
        let mut report = RunReport::default();

        for trigger in triggers {
            let Some(name) = trigger.content.action.as_deref() else {
                report.skipped += 1;
                continue;
            };

            let Some(action) = self.get(name) else {
                warn!("No action registered for {}", name);
                report.skipped += 1;
                continue;
            };

            let results = {
                let ctx = ActionContext {
                    message,
                    trigger,
                    state: &*state,
                };

                if !action.validate(&ctx).await {
                    debug!("Action {} declined trigger {}", action.name(), trigger.id);
                    report.skipped += 1;
                    continue;
                }

                match action.execute(&ctx).await {
                    Ok(results) => results,
                    Err(e) => {
                        warn!("Action {} failed: {}", action.name(), e);
                        report.failed += 1;
                        continue;
                    }
                }
            };

            let mut callback_failed = false;
            for content in results {
                if let Err(e) = callback.on_result(content, state).await {
                    warn!("Callback for {} failed: {}", action.name(), e);
                    callback_failed = true;
                }
            }

            if callback_failed {
                report.failed += 1;
            } else {
                report.executed.push(action.name().to_string());
            }
        }

        report
    }
}
