//! Structured Extraction
//!
//! The orchestrator never talks to a model itself. It hands a rendered context and
//! an [`ObjectSchema`] to a [`StructuredExtractor`] and gets back an object that is
//! validated here before anything acts on it.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, StewardError};
use crate::schema::{ObjectSchema, ValidationError};

/// Decision meaning "do nothing this cycle"
pub const ACTION_NOTHING: &str = "NOTHING";
/// Decision meaning "stop managing this user"
pub const ACTION_STOP: &str = "STOP";

/// Example repository used in schema descriptions; never a real answer
pub const PLACEHOLDER_OWNER: &str = "octocat";
pub const PLACEHOLDER_REPO: &str = "hello-world";

/// Turns a rendered context into a structured object
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(&self, context: &str, schema: &ObjectSchema) -> Result<Value>;
}

/// Extract and validate in one step
pub async fn extract_validated(
    extractor: &dyn StructuredExtractor,
    context: &str,
    schema: &ObjectSchema,
) -> Result<Value> {
    let object = extractor.extract(context, schema).await?;
    schema.validate(&object)?;
    debug!("Extracted {} object: {}", schema.name, object);
    Ok(object)
}

// ============ Repository configuration ============

/// Schema for the owner/repo/branch triple
pub fn config_schema() -> ObjectSchema {
    ObjectSchema::new("repository_config")
        .with_string_field(
            "owner",
            &format!("Repository owner, e.g. {} (empty if unknown)", PLACEHOLDER_OWNER),
            true,
        )
        .with_string_field(
            "repo",
            &format!("Repository name, e.g. {} (empty if unknown)", PLACEHOLDER_REPO),
            true,
        )
        .with_string_field("branch", "Branch to work on, e.g. main (empty if unknown)", true)
}

/// Repository configuration returned by the extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl ExtractedConfig {
    pub fn from_value(value: &Value) -> std::result::Result<Self, ValidationError> {
        config_schema().validate(value)?;
        let field = |name: &str| value.get(name).and_then(Value::as_str).unwrap_or_default().trim().to_string();
        Ok(Self {
            owner: field("owner"),
            repo: field("repo"),
            branch: field("branch"),
        })
    }

    /// All three fields are non-empty
    pub fn is_complete(&self) -> bool {
        !self.owner.is_empty() && !self.repo.is_empty() && !self.branch.is_empty()
    }

    /// The schema's example repository echoed back
    pub fn is_placeholder(&self) -> bool {
        self.owner == PLACEHOLDER_OWNER && self.repo == PLACEHOLDER_REPO
    }
}

// ============ OODA decision ============

/// Schema for a decision over the given action names
///
/// `NOTHING` and `STOP` are always allowed.
pub fn decision_schema(action_names: &[String]) -> ObjectSchema {
    let mut allowed: Vec<String> = action_names.to_vec();
    for reserved in [ACTION_NOTHING, ACTION_STOP] {
        if !allowed.iter().any(|a| a == reserved) {
            allowed.push(reserved.to_string());
        }
    }

    ObjectSchema::new("ooda_decision")
        .with_enum_field("action", "The next action to take", &allowed, true)
        .with_string_field("owner", "Repository owner", false)
        .with_string_field("repo", "Repository name", false)
        .with_string_field("branch", "Branch", false)
        .with_string_field("path", "File path the action concerns", false)
        .with_string_field("title", "Issue or pull request title", false)
        .with_string_field("description", "Issue or pull request body", false)
        .with_string_field("reasoning", "Why this action was chosen", false)
        .with_string_list_field("labels", "Labels to apply", false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionAction {
    Nothing,
    Stop,
    Run(String),
}

impl DecisionAction {
    pub fn parse(name: &str) -> Self {
        match name {
            ACTION_NOTHING => Self::Nothing,
            ACTION_STOP => Self::Stop,
            other => Self::Run(other.to_string()),
        }
    }
}

/// Next step chosen by the extractor
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDecision {
    pub action: DecisionAction,
    /// Every other member of the returned object
    pub params: Map<String, Value>,
}

impl ExtractedDecision {
    pub fn from_value(value: &Value, schema: &ObjectSchema) -> std::result::Result<Self, ValidationError> {
        schema.validate(value)?;
        let mut params = value.as_object().cloned().unwrap_or_default();
        let action = params
            .remove("action")
            .and_then(|a| a.as_str().map(DecisionAction::parse))
            .ok_or_else(|| ValidationError::MissingField("action".to_string()))?;
        params.retain(|_, v| !v.is_null());
        Ok(Self { action, params })
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.params.get("reasoning").and_then(Value::as_str)
    }
}

// ============ HTTP transport ============

/// Forwards extraction requests to an HTTP endpoint
///
/// Sends `{"context": .., "schema": ..}` and accepts either the bare object or
/// `{"object": ..}` back.
pub struct RemoteExtractor {
    url: String,
    client: reqwest::Client,
}

impl RemoteExtractor {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl StructuredExtractor for RemoteExtractor {
    async fn extract(&self, context: &str, schema: &ObjectSchema) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "context": context,
                "schema": schema.to_json_schema(),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StewardError::Extraction(format!(
                "{} returned {}",
                self.url, status
            )));
        }

        let mut body: Value = response.json().await?;
        Ok(match body.get_mut("object") {
            Some(object) => object.take(),
            None => body,
        })
    }
}
