//! Actions owned by the orchestrator itself
//!
//! Everything that talks to the code-hosting platform lives outside this crate and
//! is registered alongside these.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Action, ActionContext};
use crate::error::Result;
use crate::extraction::ACTION_STOP;
use crate::memory::{Content, SOURCE_TAG};

pub const CONFIGURE_REPOSITORY: &str = "CONFIGURE_REPOSITORY";

/// Acknowledges the committed repository configuration
pub struct ConfigureRepositoryAction;

#[async_trait]
impl Action for ConfigureRepositoryAction {
    fn name(&self) -> &str {
        CONFIGURE_REPOSITORY
    }

    fn similes(&self) -> &[&str] {
        &["CONFIG_GITHUB_INFO", "SET_REPOSITORY"]
    }

    fn description(&self) -> &str {
        "Confirm which repository and branch the agent is working on"
    }

    async fn validate(&self, ctx: &ActionContext<'_>) -> bool {
        ctx.state.has_repository()
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<Vec<Content>> {
        let state = ctx.state;
        let text = format!(
            "Configured repository {}/{} on {} branch",
            state.owner.as_deref().unwrap_or_default(),
            state.repo.as_deref().unwrap_or_default(),
            state.branch.as_deref().unwrap_or_default(),
        );
        Ok(vec![Content::text(text)
            .with_action(CONFIGURE_REPOSITORY)
            .with_source(SOURCE_TAG)])
    }
}

/// Acknowledges a request to stop working for the user
pub struct StopAction;

#[async_trait]
impl Action for StopAction {
    fn name(&self) -> &str {
        ACTION_STOP
    }

    fn similes(&self) -> &[&str] {
        &["STOP_OODA", "HALT"]
    }

    fn description(&self) -> &str {
        "Stop managing the repository for this user"
    }

    async fn execute(&self, _ctx: &ActionContext<'_>) -> Result<Vec<Content>> {
        Ok(vec![Content::text("Stopping, no further actions will be taken.")
            .with_action(ACTION_STOP)
            .with_source(SOURCE_TAG)])
    }
}

/// The orchestrator's own actions
pub fn builtin_actions() -> Vec<Arc<dyn Action>> {
    vec![Arc::new(ConfigureRepositoryAction), Arc::new(StopAction)]
}
