//! Prompt Templates
//!
//! Renders `{{placeholder}}` templates against conversation state. Unknown
//! placeholders render as empty text.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::state::ConversationState;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Template for discovering which repository the user wants managed
pub const CONFIG_REPO_INFO_TEMPLATE: &str = r#"You are {{agentName}}, an agent that maintains a code repository for a user.

Recent conversation:
{{recentMessages}}

From the conversation above, extract the repository the user wants you to work on.
Respond with a JSON object with the fields "owner", "repo" and "branch".
Use an empty string for any field the user has not stated yet. Do not guess.
"#;

/// Template for the steady-state decision
pub const OODA_TEMPLATE: &str = r#"You are {{agentName}}, maintaining {{owner}}/{{repo}} on branch {{branch}}.

Recent conversation:
{{recentMessages}}

Repository files:
{{files}}

Previous issues:
{{previousIssues}}

Previous pull requests:
{{previousPRs}}

Available actions: {{actionNames}}

Observe the state above, orient yourself, then decide the single next action.
Respond with a JSON object whose "action" field is one of the available actions.
Choose NOTHING when no action is needed and STOP when the user asked you to stop.
"#;

/// Render `template` with arbitrary values
pub fn render(template: &str, values: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Render `template` against state, with extra values layered on top
pub fn compose_context(state: &ConversationState, template: &str, extra: &[(&'static str, String)]) -> String {
    let mut values = state.template_values();
    for (key, value) in extra {
        values.insert(*key, value.clone());
    }
    render(template, &values)
}
