//! Per-User Process
//!
//! Drives one user through Discovery -> Initialization -> OODA. Every loop checks
//! the global stop flag and the user's registry membership at its head and exits
//! quietly when either says so. Any error escaping a phase ends only this user's
//! process: it is captured, the user is deregistered and the task returns. The
//! monitor starts a failed user again on its next scan; a STOP decision retires
//! the user instead.
//!
//! ```text
//! Discovery ──(owner/repo/branch committed)──> Initialization ──(files seen)──> OODA ──┐
//!     │                                              │                              ^   │
//!     └──────────────── stop / deregister ───────────┴──────────────> Stopped <─────┘───┘
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::{Action, ActionCallback, ActionRegistry, LogCallback, CREATE_MEMORIES_FROM_FILES, INITIALIZE_REPOSITORY};
use crate::artifacts::{self, RepositorySnapshotter, SnapshotTarget};
use crate::config::OrchestratorConfig;
use crate::error::{Result, StewardError};
use crate::extraction::{
    config_schema, decision_schema, extract_validated, DecisionAction, ExtractedConfig, ExtractedDecision,
    StructuredExtractor,
};
use crate::ids::{RecordId, RoomId, UserId};
use crate::memory::{ConnectionProvisioner, Content, MemoryQuery, MemoryRecord, MemoryStore, SOURCE_TAG};
use crate::prompt::{compose_context, CONFIG_REPO_INFO_TEMPLATE, OODA_TEMPLATE};
use crate::registry::{Phase, ProcessRegistry};
use crate::schema::ObjectSchema;
use crate::sleeper;
use crate::state::ConversationState;
use crate::telemetry::{ErrorContext, ErrorSink, StewardStats};

/// Collaborators shared by the monitor and every user process
pub struct Services {
    pub config: OrchestratorConfig,
    pub store: Arc<dyn MemoryStore>,
    pub provisioner: Arc<dyn ConnectionProvisioner>,
    pub extractor: Arc<dyn StructuredExtractor>,
    pub snapshotter: Arc<dyn RepositorySnapshotter>,
    pub actions: Arc<ActionRegistry>,
    /// Actions registered on start and released on stop
    pub owned_actions: Vec<Arc<dyn Action>>,
    pub errors: Arc<dyn ErrorSink>,
    pub registry: Arc<ProcessRegistry>,
    pub stats: Arc<StewardStats>,
}

impl Services {
    /// Base error context for this agent
    pub fn error_context(&self) -> ErrorContext {
        ErrorContext::agent(self.config.agent_id)
    }

    pub fn capture(&self, message: &str, context: &ErrorContext) {
        StewardStats::incr(&self.stats.errors_captured);
        self.errors.capture(message, context);
    }

    /// Unregister the owned actions; safe to call repeatedly
    pub fn release_actions(&self) {
        self.actions.unregister(&self.owned_actions);
    }

    /// Write a pretty JSON snapshot into the debug directory, if one is configured
    pub async fn dump_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        let Some(dir) = &self.config.debug_dir else {
            return;
        };
        match serde_json::to_string_pretty(value) {
            Ok(text) => write_dump(dir, name, &text).await,
            Err(e) => warn!("Failed to serialize debug snapshot {}: {}", name, e),
        }
    }

    pub async fn dump_text(&self, name: &str, text: &str) {
        if let Some(dir) = &self.config.debug_dir {
            write_dump(dir, name, text).await;
        }
    }
}

async fn write_dump(dir: &Path, name: &str, text: &str) {
    let path = dir.join(name);
    if let Err(e) = tokio::fs::write(&path, text).await {
        warn!("Failed to write debug snapshot {}: {}", path.display(), e);
    }
}

pub struct UserProcess {
    services: Arc<Services>,
    user: UserId,
    room: RoomId,
    /// Cancelled on deregistration or global stop
    token: CancellationToken,
}

impl UserProcess {
    pub fn new(services: Arc<Services>, user: UserId, room: RoomId, token: CancellationToken) -> Self {
        Self {
            services,
            user,
            room,
            token,
        }
    }

    /// Run all phases; errors end at this boundary
    pub async fn run(self) {
        info!(user_id = %self.user, room_id = %self.room, "Starting user process");

        match self.drive().await {
            Ok(()) => debug!(user_id = %self.user, "User process finished"),
            Err(e) => {
                error!(user_id = %self.user, "Error in user process: {}", e);
                self.services.registry.deregister(self.user);
                self.services.capture(&e.to_string(), &self.context("startUserProcess"));
                StewardStats::incr(&self.services.stats.users_failed);
            }
        }
    }

    async fn drive(&self) -> Result<()> {
        let Some(state) = self.discover().await? else {
            return Ok(());
        };
        self.services.registry.set_state(self.user, &state);

        self.services.registry.set_phase(self.user, Phase::Initialization);
        let Some(state) = self.initialize(state).await? else {
            return Ok(());
        };
        self.services.registry.set_state(self.user, &state);

        self.services.registry.set_phase(self.user, Phase::Ooda);
        self.ooda(state).await
    }

    fn context(&self, action: &str) -> ErrorContext {
        self.services.error_context().user(self.user).room(self.room).action(action)
    }

    /// Loop-head check shared by every phase
    fn halted(&self) -> bool {
        if self.services.registry.is_stopped() {
            self.services.release_actions();
            info!(user_id = %self.user, "Orchestrator stopped, user process exiting");
            return true;
        }
        if !self.services.registry.is_registered(self.user) {
            info!(user_id = %self.user, "User no longer registered, user process exiting");
            return true;
        }
        false
    }

    async fn sleep(&self, duration: Duration) {
        if sleeper::sleep(duration, &self.token).await.is_cancelled() {
            debug!(user_id = %self.user, "Sleep interrupted");
        }
    }

    async fn latest(&self) -> Result<Option<MemoryRecord>> {
        self.services.store.latest(self.room).await
    }

    /// Compose state on first use, then merge new history into it
    async fn refresh<'s>(
        &self,
        state: &'s mut Option<ConversationState>,
        message: &MemoryRecord,
    ) -> Result<&'s mut ConversationState> {
        let store = self.services.store.as_ref();
        let refreshed = match state.take() {
            Some(mut existing) => {
                existing.update_recent(store).await?;
                existing
            }
            None => ConversationState::compose(store, message, &self.services.config.agent_name).await?,
        };
        let state = state.insert(refreshed);
        self.services.registry.set_state(self.user, state);
        Ok(state)
    }

    async fn extract(&self, context: &str, schema: &ObjectSchema, action: &str) -> Result<Value> {
        match extract_validated(self.services.extractor.as_ref(), context, schema).await {
            Ok(object) => Ok(object),
            Err(e) => {
                if e.is_validation() {
                    error!(user_id = %self.user, "Invalid content: {}", e);
                    self.services.capture(&format!("Invalid content: {}", e), &self.context(action));
                }
                Err(e)
            }
        }
    }

    fn record(&self, content: Content, suffix: &str) -> MemoryRecord {
        let now = chrono::Utc::now().timestamp_millis();
        let id = RecordId::derive(self.room, self.services.config.agent_id, self.user, now, suffix);
        MemoryRecord::new(self.room, self.user, self.services.config.agent_id, content)
            .with_id(id)
            .with_created_at(now)
    }

    // ============ Discovery ============

    /// Converge on an owner/repo/branch triple; `None` when told to stop
    async fn discover(&self) -> Result<Option<ConversationState>> {
        let interval = self.services.config.intervals.discovery;
        let mut state: Option<ConversationState> = None;

        self.sleep(interval).await;

        loop {
            if self.halted() {
                return Ok(None);
            }
            StewardStats::incr(&self.services.stats.discovery_cycles);
            debug!(user_id = %self.user, "Processing repository discovery cycle");

            let Some(message) = self.latest().await? else {
                debug!(user_id = %self.user, "No memories found, skipping discovery cycle");
                self.sleep(interval).await;
                continue;
            };

            let current = self.refresh(&mut state, &message).await?;
            let context = compose_context(current, CONFIG_REPO_INFO_TEMPLATE, &[]);
            let object = self.extract(&context, &config_schema(), "discoverRepository").await?;
            let extracted = ExtractedConfig::from_value(&object)?;
            self.services.dump_json("extracted-content.json", &object).await;

            if extracted.is_complete() {
                if extracted.is_placeholder() {
                    info!(user_id = %self.user, "Wrong pick {}/{}, trying again", extracted.owner, extracted.repo);
                    self.sleep(interval).await;
                    continue;
                }

                info!(
                    user_id = %self.user,
                    "Repository configuration complete for {}/{} on {} branch",
                    extracted.owner, extracted.repo, extracted.branch
                );
                current.set_repository(&extracted.owner, &extracted.repo, &extracted.branch);
                self.services.registry.set_state(self.user, current);
                break;
            }

            self.sleep(interval).await;
        }

        self.sleep(self.services.config.intervals.discovery_settle).await;
        if self.halted() {
            return Ok(None);
        }
        Ok(state)
    }

    // ============ Initialization ============

    /// Seed the repository directives and wait for files to show up in memory
    async fn initialize(&self, mut state: ConversationState) -> Result<Option<ConversationState>> {
        if self.halted() {
            return Ok(None);
        }
        let services = &self.services;
        let owner = state.owner.clone().unwrap_or_default();
        let repo = state.repo.clone().unwrap_or_default();
        let branch = state.branch.clone().unwrap_or_default();
        let reply_to = *self.user.as_uuid();

        let initialize = self.record(
            Content::text(format!("Initialize the repository {}/{} on {} branch", owner, repo, branch))
                .with_action(INITIALIZE_REPOSITORY)
                .with_source(SOURCE_TAG)
                .with_reply_to(reply_to),
            "initialize-repository",
        );
        services.store.append(initialize.clone()).await?;

        let create_memories = self.record(
            Content::text(format!(
                "Create memories from files for the repository {}/{} @ branch {} and path '/'",
                owner, repo, branch
            ))
            .with_action(CREATE_MEMORIES_FROM_FILES)
            .with_source(SOURCE_TAG)
            .with_reply_to(reply_to),
            "create-memories-from-files",
        );
        services.store.append(create_memories.clone()).await?;

        let Some(message) = self.latest().await? else {
            let err = StewardError::MissingSeedMessage("repo init loop");
            error!(user_id = %self.user, "{}", err);
            services.capture(&err.to_string(), &self.context("initializeRepository"));
            return Err(err);
        };

        let target = SnapshotTarget {
            user_id: self.user,
            message: &message,
            owner: &owner,
            repo: &repo,
            branch: &branch,
            token: services.config.api_token.as_deref(),
        };
        services.snapshotter.save_issues(&target, services.config.limits.issues).await?;
        services
            .snapshotter
            .save_pull_requests(&target, services.config.limits.pull_requests)
            .await?;

        let mut replies = InitReplies {
            process: self,
            initialize_id: initialize.id,
            create_memories_id: create_memories.id,
            stored: 0,
        };
        let report = services
            .actions
            .run(&message, &[initialize, create_memories], &mut state, &mut replies)
            .await;
        info!(
            user_id = %self.user,
            "Repository directives processed: {} executed, {} skipped, {} failed",
            report.executed.len(), report.skipped, report.failed
        );
        services.registry.set_state(self.user, &state);

        if services.config.debug_dir.is_some() {
            let memories = services.store.query(&MemoryQuery::room(self.room).count(1000)).await?;
            services.dump_json("memories-post-repo-init.json", &memories).await;
            services.dump_json("state-post-repo-init.json", &state).await;
        }

        let interval = services.config.intervals.repo_init;
        self.sleep(interval).await;

        loop {
            if self.halted() {
                return Ok(None);
            }
            StewardStats::incr(&services.stats.init_cycles);
            debug!(user_id = %self.user, "Processing repo init cycle");

            let memories = services.store.query(&MemoryQuery::room(self.room)).await?;
            if memories.is_empty() {
                debug!(user_id = %self.user, "No memories found, skipping repo init cycle");
                self.sleep(interval).await;
                continue;
            }

            let Some(files) = artifacts::files_json(&memories)? else {
                debug!(user_id = %self.user, "No files found, skipping repo init cycle");
                self.sleep(interval).await;
                continue;
            };

            state.files = Some(files);
            state.previous_issues = Some(artifacts::previous_issues_json(&memories)?);
            state.previous_prs = Some(artifacts::previous_prs_json(&memories)?);
            info!(user_id = %self.user, "Repository files available, initialization complete");
            break;
        }

        self.sleep(interval).await;
        if self.halted() {
            return Ok(None);
        }
        Ok(Some(state))
    }

    // ============ OODA ============

    /// Observe, orient, decide, act until stopped
    async fn ooda(&self, state: ConversationState) -> Result<()> {
        let services = &self.services;
        let interval = services.config.intervals.ooda;
        let mut state = Some(state);

        loop {
            if self.halted() {
                return Ok(());
            }
            StewardStats::incr(&services.stats.ooda_cycles);
            debug!(user_id = %self.user, "Processing OODA cycle");

            // Observe
            let latest = self.latest().await?;
            services.dump_json("message.json", &latest).await;
            let Some(message) = latest else {
                debug!(user_id = %self.user, "No message found, skipping OODA cycle");
                self.sleep(interval).await;
                continue;
            };

            // Orient
            let current = self.refresh(&mut state, &message).await?;
            let names = services.actions.names();
            let context = compose_context(current, OODA_TEMPLATE, &[("actionNames", names.join(", "))]);
            services.dump_text("context.txt", &context).await;

            // Decide
            let schema = decision_schema(&names);
            let object = self.extract(&context, &schema, "startOODALoop").await?;
            let decision = ExtractedDecision::from_value(&object, &schema)?;
            services.dump_json("content.json", &object).await;

            let name = match &decision.action {
                DecisionAction::Stop => {
                    info!(user_id = %self.user, "Stopping the OODA loop");
                    services.registry.retire(self.user);
                    continue;
                }
                DecisionAction::Nothing => {
                    debug!(user_id = %self.user, "Action is NOTHING, skipping OODA cycle");
                    self.sleep(interval).await;
                    continue;
                }
                DecisionAction::Run(name) => name.clone(),
            };

            // Act
            let mut content = Content::text(format!("Going to execute action: {}", name))
                .with_action(&name)
                .with_source(SOURCE_TAG)
                .with_reply_to(*self.user.as_uuid());
            if !decision.params.is_empty() {
                content = content.with_metadata(Value::Object(decision.params.clone()));
            }
            let announcement = self.record(content, &name);

            if let Err(e) = services.store.append(announcement.clone()).await {
                error!(user_id = %self.user, "Error creating memory: {}", e);
                services.capture("Error creating memory", &self.context("startOODALoop"));
                return Err(e);
            }
            StewardStats::incr(&services.stats.actions_announced);

            info!(user_id = %self.user, "Processing actions for action: {}", name);
            let report = services
                .actions
                .run(&message, std::slice::from_ref(&announcement), current, &mut LogCallback)
                .await;
            debug!(user_id = %self.user, "OODA cycle completed: {:?}", report);
            services.registry.set_state(self.user, current);

            self.sleep(interval).await;
        }
    }
}

/// Appends each initialization result as a reply to the directive it answers
struct InitReplies<'a> {
    process: &'a UserProcess,
    initialize_id: RecordId,
    create_memories_id: RecordId,
    /// Replies appended so far; keeps ids distinct within one millisecond
    stored: usize,
}

#[async_trait]
impl<'a> ActionCallback for InitReplies<'a> {
    async fn on_result(&mut self, content: Content, state: &mut ConversationState) -> Result<()> {
        let process = self.process;
        let services = &process.services;

        let reply_to = if content.action.as_deref() == Some(INITIALIZE_REPOSITORY) {
            self.initialize_id
        } else {
            self.create_memories_id
        };
        let suffix = format!(
            "{}-response-{}",
            content.action.as_deref().unwrap_or_default(),
            self.stored
        );

        let mut content = content;
        content.user = Some(services.config.agent_name.clone());
        content.in_reply_to = Some(*reply_to.as_uuid());
        if content.source.is_none() {
            content.source = Some(SOURCE_TAG.to_string());
        }

        if content.text.trim().is_empty() {
            error!(user_id = %process.user, "Empty response, skipping");
            services.capture("Empty response, skipping", &process.context("initializeRepository"));
            return Ok(());
        }

        let reply = process.record(content, &suffix);
        debug!(user_id = %process.user, "Reply memory: {:?}", reply);
        if let Err(e) = services.store.append(reply).await {
            error!(user_id = %process.user, "Error creating reply memory: {}", e);
            services.capture("Error creating reply memory", &process.context("initializeRepository"));
            return Err(e);
        }
        self.stored += 1;
        state.update_recent(services.store.as_ref()).await?;
        Ok(())
    }
}
