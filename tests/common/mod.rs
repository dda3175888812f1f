#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use repo_steward::actions::{Action, ActionContext, CREATE_MEMORIES_FROM_FILES, INITIALIZE_REPOSITORY};
use repo_steward::memory::{Connection, ConnectionProvisioner};
use repo_steward::{
    AgentId, Content, InMemoryStore, Intervals, MemoryQuery, MemoryRecord, MemoryStore, ObjectSchema,
    OrchestratorConfig, RecordingErrorSink, RepositorySnapshotter, Result, RoomId, SnapshotTarget, StewardClient,
    StewardError, StructuredExtractor, UserId,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TICK: Duration = Duration::from_millis(10);
pub const PATIENCE: Duration = Duration::from_secs(5);

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        intervals: Intervals::uniform(TICK),
        ..OrchestratorConfig::default()
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub async fn wait_for<F, Fut>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn incomplete() -> Value {
    json!({"owner": "", "repo": "", "branch": ""})
}

pub fn acme() -> Value {
    json!({"owner": "acme", "repo": "widgets", "branch": "main"})
}

pub fn sentinel() -> Value {
    json!({"owner": "octocat", "repo": "hello-world", "branch": "main"})
}

pub fn decision(action: &str) -> Value {
    json!({"action": action})
}

/// Scripted answers, chosen by schema name and a needle in the rendered context
///
/// Each script is consumed in order; its last answer repeats once it runs out.
/// A schema marked with [`fail`](Self::fail) errors out for its first calls.
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: Mutex<Vec<(String, String, VecDeque<Value>)>>,
    failures: Mutex<HashMap<String, usize>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, schema: &str, needle: &str, answers: Vec<Value>) -> Self {
        self.scripts.lock().push((schema.to_string(), needle.to_string(), answers.into()));
        self
    }

    pub fn config(self, needle: &str, answers: Vec<Value>) -> Self {
        self.script("repository_config", needle, answers)
    }

    pub fn decisions(self, needle: &str, answers: Vec<Value>) -> Self {
        self.script("ooda_decision", needle, answers)
    }

    /// Fail the next `times` calls for `schema` with a transport error
    pub fn fail(self, schema: &str, times: usize) -> Self {
        self.failures.lock().insert(schema.to_string(), times);
        self
    }

    pub fn calls(&self, schema: &str) -> usize {
        self.calls.lock().get(schema).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StructuredExtractor for ScriptedExtractor {
    async fn extract(&self, context: &str, schema: &ObjectSchema) -> Result<Value> {
        *self.calls.lock().entry(schema.name.clone()).or_default() += 1;

        if let Some(left) = self.failures.lock().get_mut(&schema.name) {
            if *left > 0 {
                *left -= 1;
                return Err(StewardError::Extraction("timeout".to_string()));
            }
        }

        let mut scripts = self.scripts.lock();
        for (name, needle, answers) in scripts.iter_mut() {
            if *name == schema.name && context.contains(needle.as_str()) {
                let answer = if answers.len() > 1 { answers.pop_front() } else { answers.front().cloned() };
                return answer.ok_or_else(|| StewardError::Extraction("script exhausted".to_string()));
            }
        }

        Ok(match schema.name.as_str() {
            "repository_config" => incomplete(),
            _ => decision("NOTHING"),
        })
    }
}

/// Stand-in for the repository collaborator's directive actions
///
/// `INITIALIZE_REPOSITORY` replies with `init_replies`. `CREATE_MEMORIES_FROM_FILES`
/// replies with `memories_reply` and, when `files` is set, stores a file record.
pub struct RepoActions {
    pub store: Arc<InMemoryStore>,
    pub init_replies: Vec<String>,
    pub memories_reply: String,
    pub files: bool,
    pub executed: Mutex<Vec<String>>,
}

impl RepoActions {
    pub fn new(store: Arc<InMemoryStore>, memories_reply: &str, files: bool) -> Arc<Self> {
        Self::with_replies(store, &["Repository initialized"], memories_reply, files)
    }

    pub fn with_replies(store: Arc<InMemoryStore>, init_replies: &[&str], memories_reply: &str, files: bool) -> Arc<Self> {
        Arc::new(Self {
            store,
            init_replies: init_replies.iter().map(|r| r.to_string()).collect(),
            memories_reply: memories_reply.to_string(),
            files,
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn actions(self: &Arc<Self>) -> Vec<Arc<dyn Action>> {
        vec![
            Arc::new(Directive {
                name: INITIALIZE_REPOSITORY,
                owner: Arc::clone(self),
            }),
            Arc::new(Directive {
                name: CREATE_MEMORIES_FROM_FILES,
                owner: Arc::clone(self),
            }),
        ]
    }
}

struct Directive {
    name: &'static str,
    owner: Arc<RepoActions>,
}

#[async_trait]
impl Action for Directive {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<Vec<Content>> {
        self.owner.executed.lock().push(self.name.to_string());

        if self.name == INITIALIZE_REPOSITORY {
            return Ok(self
                .owner
                .init_replies
                .iter()
                .map(|reply| Content::text(reply.clone()).with_action(INITIALIZE_REPOSITORY))
                .collect());
        }

        if self.owner.files {
            store_file(&self.owner.store, ctx.trigger.room_id, ctx.trigger.user_id, ctx.trigger.agent_id).await;
        }
        Ok(vec![Content::text(self.owner.memories_reply.clone()).with_action(CREATE_MEMORIES_FROM_FILES)])
    }
}

/// Action that only counts how often it ran
pub struct CountingAction {
    name: &'static str,
    pub runs: AtomicUsize,
}

impl CountingAction {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for CountingAction {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _ctx: &ActionContext<'_>) -> Result<Vec<Content>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

/// Snapshot call as seen by [`RecordingSnapshotter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCall {
    pub kind: &'static str,
    pub repository: String,
    pub token: Option<String>,
    pub limit: usize,
}

#[derive(Default)]
pub struct RecordingSnapshotter {
    pub calls: Mutex<Vec<SnapshotCall>>,
}

impl RecordingSnapshotter {
    fn record(&self, kind: &'static str, target: &SnapshotTarget<'_>, limit: usize) {
        self.calls.lock().push(SnapshotCall {
            kind,
            repository: format!("{}/{}", target.owner, target.repo),
            token: target.token.map(str::to_string),
            limit,
        });
    }
}

#[async_trait]
impl RepositorySnapshotter for RecordingSnapshotter {
    async fn save_issues(&self, target: &SnapshotTarget<'_>, limit: usize) -> Result<()> {
        self.record("issues", target, limit);
        Ok(())
    }

    async fn save_pull_requests(&self, target: &SnapshotTarget<'_>, limit: usize) -> Result<()> {
        self.record("pull_requests", target, limit);
        Ok(())
    }
}

pub async fn store_file(store: &InMemoryStore, room: RoomId, user: UserId, agent: AgentId) {
    let file = Content::text("# widgets").with_metadata(json!({"path": "README.md"}));
    store.append(MemoryRecord::new(room, user, agent, file)).await.unwrap();
}

/// Post a join record and a first message for `name`
pub async fn join(store: &InMemoryStore, agent: AgentId, name: &str, text: &str) -> (UserId, RoomId) {
    let user = UserId::from_name(name);
    let room = RoomId::for_user(agent, user);
    store
        .append(MemoryRecord::new(RoomId::join_room(agent), user, agent, Content::text("joined")))
        .await
        .unwrap();
    store
        .append(MemoryRecord::new(room, user, agent, Content::text(text)))
        .await
        .unwrap();
    (user, room)
}

pub async fn room_records(store: &InMemoryStore, room: RoomId) -> Vec<MemoryRecord> {
    store.query(&MemoryQuery::room(room)).await.unwrap()
}

/// Store that can be told to misbehave
///
/// - `fail_queries`: every query errors
/// - `fail_announcements`: appends of OODA announcements error
/// - `hide_seed`: `latest` finds nothing once a room holds the repository directives
pub struct FlakyStore {
    pub inner: Arc<InMemoryStore>,
    pub fail_queries: AtomicBool,
    pub fail_announcements: AtomicBool,
    pub hide_seed: AtomicBool,
    pub failed: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fail_queries: AtomicBool::new(false),
            fail_announcements: AtomicBool::new(false),
            hide_seed: AtomicBool::new(false),
            failed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MemoryStore for FlakyStore {
    async fn append(&self, record: MemoryRecord) -> Result<()> {
        if self.fail_announcements.load(Ordering::SeqCst) && record.content.text.starts_with("Going to execute action") {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(StewardError::Store("disk full".to_string()));
        }
        self.inner.append(record).await
    }

    async fn latest(&self, room_id: RoomId) -> Result<Option<MemoryRecord>> {
        if self.hide_seed.load(Ordering::SeqCst) {
            let records = self.inner.query(&MemoryQuery::room(room_id)).await?;
            if records.iter().any(|r| r.content.action.as_deref() == Some(INITIALIZE_REPOSITORY)) {
                return Ok(None);
            }
        }
        self.inner.latest(room_id).await
    }

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(StewardError::Store("database is locked".to_string()));
        }
        self.inner.query(query).await
    }
}

#[async_trait]
impl ConnectionProvisioner for FlakyStore {
    async fn ensure_connection(&self, connection: &Connection) -> Result<()> {
        self.inner.ensure_connection(connection).await
    }
}

pub struct Harness {
    pub client: StewardClient,
    pub store: Arc<InMemoryStore>,
    pub extractor: Arc<ScriptedExtractor>,
    pub errors: Arc<RecordingErrorSink>,
    pub agent: AgentId,
}

impl Harness {
    pub fn new(extractor: ScriptedExtractor) -> Self {
        Self::with_actions(extractor, |_| Vec::new())
    }

    pub fn with_actions<F>(extractor: ScriptedExtractor, actions: F) -> Self
    where
        F: FnOnce(&Arc<InMemoryStore>) -> Vec<Arc<dyn Action>>,
    {
        let store = Arc::new(InMemoryStore::new());
        Self::assemble(extractor, store.clone(), store.clone(), store, actions)
    }

    /// Harness whose client talks to a [`FlakyStore`] over `store`
    pub fn flaky<F>(extractor: ScriptedExtractor, actions: F) -> (Self, Arc<FlakyStore>)
    where
        F: FnOnce(&Arc<InMemoryStore>) -> Vec<Arc<dyn Action>>,
    {
        let store = Arc::new(InMemoryStore::new());
        let backend = Arc::new(FlakyStore::new(store.clone()));
        let harness = Self::assemble(extractor, store, backend.clone(), backend.clone(), actions);
        (harness, backend)
    }

    fn assemble<F>(
        extractor: ScriptedExtractor,
        store: Arc<InMemoryStore>,
        backend: Arc<dyn MemoryStore>,
        provisioner: Arc<dyn ConnectionProvisioner>,
        actions: F,
    ) -> Self
    where
        F: FnOnce(&Arc<InMemoryStore>) -> Vec<Arc<dyn Action>>,
    {
        let config = test_config();
        let agent = config.agent_id;
        let extractor = Arc::new(extractor);
        let errors = Arc::new(RecordingErrorSink::new());

        let client = StewardClient::builder(config, backend, provisioner, extractor.clone())
            .actions(actions(&store))
            .error_sink(errors.clone())
            .build();

        Self {
            client,
            store,
            extractor,
            errors,
            agent,
        }
    }
}
