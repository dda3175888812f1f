//! Steward Client
//!
//! Wires the collaborators together and exposes the two lifecycle controls,
//! [`StewardClient::start`] and [`StewardClient::stop`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actions::builtin::builtin_actions;
use crate::actions::{Action, ActionRegistry};
use crate::artifacts::{NoopSnapshotter, RepositorySnapshotter};
use crate::config::OrchestratorConfig;
use crate::extraction::StructuredExtractor;
use crate::memory::{ConnectionProvisioner, MemoryStore};
use crate::monitor::UserMonitor;
use crate::process::Services;
use crate::registry::ProcessRegistry;
use crate::telemetry::{ErrorSink, StewardStats, StewardStatsSnapshot, TracingErrorSink};

pub struct StewardClientBuilder {
    config: OrchestratorConfig,
    store: Arc<dyn MemoryStore>,
    provisioner: Arc<dyn ConnectionProvisioner>,
    extractor: Arc<dyn StructuredExtractor>,
    snapshotter: Arc<dyn RepositorySnapshotter>,
    actions: Arc<ActionRegistry>,
    owned_actions: Vec<Arc<dyn Action>>,
    errors: Arc<dyn ErrorSink>,
}

impl StewardClientBuilder {
    /// Replace the issue/pull request snapshotter (default: no-op)
    pub fn snapshotter(mut self, snapshotter: Arc<dyn RepositorySnapshotter>) -> Self {
        self.snapshotter = snapshotter;
        self
    }

    /// Add actions owned by this client, next to the built-in ones
    pub fn actions(mut self, actions: impl IntoIterator<Item = Arc<dyn Action>>) -> Self {
        self.owned_actions.extend(actions);
        self
    }

    /// Share an existing action registry
    pub fn action_registry(mut self, registry: Arc<ActionRegistry>) -> Self {
        self.actions = registry;
        self
    }

    pub fn error_sink(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    pub fn build(self) -> StewardClient {
        let services = Services {
            config: self.config,
            store: self.store,
            provisioner: self.provisioner,
            extractor: self.extractor,
            snapshotter: self.snapshotter,
            actions: self.actions,
            owned_actions: self.owned_actions,
            errors: self.errors,
            registry: Arc::new(ProcessRegistry::new()),
            stats: Arc::new(StewardStats::default()),
        };
        StewardClient {
            services: Arc::new(services),
            monitor: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }
}

pub struct StewardClient {
    services: Arc<Services>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl StewardClient {
    pub fn builder(
        config: OrchestratorConfig,
        store: Arc<dyn MemoryStore>,
        provisioner: Arc<dyn ConnectionProvisioner>,
        extractor: Arc<dyn StructuredExtractor>,
    ) -> StewardClientBuilder {
        StewardClientBuilder {
            config,
            store,
            provisioner,
            extractor,
            snapshotter: Arc::new(NoopSnapshotter),
            actions: Arc::new(ActionRegistry::new()),
            owned_actions: builtin_actions(),
            errors: Arc::new(TracingErrorSink),
        }
    }

    /// Register actions and launch the monitor; later calls do nothing
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.services.registry.is_stopped() {
            warn!("Steward client already stopped, not starting");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            agent_id = %self.services.config.agent_id,
            "Starting steward client as {}", self.services.config.agent_name
        );
        self.services.actions.register(&self.services.owned_actions);

        let monitor = UserMonitor::new(Arc::clone(&self.services));
        *self.monitor.lock() = Some(tokio::spawn(monitor.run()));
    }

    /// Set the global stop flag and forget every user
    ///
    /// In-flight extraction or action calls are not interrupted; their loops exit
    /// at the next poll point.
    pub fn stop(&self) {
        info!("Stopping steward client");
        self.services.registry.stop_all();
        self.services.release_actions();
    }

    /// Stop, then wait for the monitor and every user task to finish
    pub async fn shutdown(&self) {
        self.stop();

        let mut handles = self.services.registry.take_handles();
        if let Some(monitor) = self.monitor.lock().take() {
            handles.push(monitor);
        }

        let count = handles.len();
        for result in futures_util::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Task ended abnormally: {}", e);
            }
        }
        info!("Steward client shut down ({} tasks)", count);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.services.registry
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.services.actions
    }

    pub fn stats(&self) -> StewardStatsSnapshot {
        self.services.stats.snapshot()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.services.config
    }
}
