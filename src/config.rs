//! Configuration management

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::ids::AgentId;

pub const DEFAULT_AGENT_NAME: &str = "steward";

/// Poll intervals of the orchestration loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    /// Between monitor scans of the join room
    pub user_check: Duration,
    /// Between discovery cycles
    pub discovery: Duration,
    /// Between initialization polls, and before and after the polling loop
    pub repo_init: Duration,
    /// Between OODA cycles
    pub ooda: Duration,
    /// Pause after discovery commits a repository
    pub discovery_settle: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            user_check: Duration::from_millis(5000),
            discovery: Duration::from_millis(1000),
            repo_init: Duration::from_millis(5000),
            ooda: Duration::from_millis(60_000),
            discovery_settle: Duration::from_millis(5000),
        }
    }
}

impl Intervals {
    /// Every interval set to `interval`
    pub fn uniform(interval: Duration) -> Self {
        Self {
            user_check: interval,
            discovery: interval,
            repo_init: interval,
            ooda: interval,
            discovery_settle: interval,
        }
    }
}

/// Upper bounds on the issue and pull request snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotLimits {
    pub issues: usize,
    pub pull_requests: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            issues: 10,
            pull_requests: 10,
        }
    }
}

/// Everything the orchestrator itself consumes
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub intervals: Intervals,
    pub limits: SnapshotLimits,
    pub agent_id: AgentId,
    /// Character name written on agent replies
    pub agent_name: String,
    /// Directory for JSON debug snapshots
    pub debug_dir: Option<PathBuf>,
    /// Hosting platform token, handed to the snapshot collaborator
    pub api_token: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            intervals: Intervals::default(),
            limits: SnapshotLimits::default(),
            agent_id: AgentId::from_name(DEFAULT_AGENT_NAME),
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            debug_dir: None,
            api_token: None,
        }
    }
}

/// Binary configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,

    /// SQLite database path for memories
    pub db_path: PathBuf,

    /// Endpoint of the structured extraction service
    pub extractor_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let count = |key: &str, default: usize| {
            lookup(key)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        let defaults = Intervals::default();
        let intervals = Intervals {
            user_check: millis("GITHUB_USER_CHECK_INTERVAL_MS", defaults.user_check),
            discovery: millis("GITHUB_INFO_DISCOVERY_INTERVAL_MS", defaults.discovery),
            repo_init: millis("GITHUB_REPO_INIT_INTERVAL_MS", defaults.repo_init),
            ooda: millis("GITHUB_OODA_INTERVAL_MS", defaults.ooda),
            discovery_settle: defaults.discovery_settle,
        };

        let limits = SnapshotLimits {
            issues: count("GITHUB_ISSUES_LIMIT", 10),
            pull_requests: count("GITHUB_PULL_REQUESTS_LIMIT", 10),
        };

        let agent_name = lookup("REPO_STEWARD_AGENT_NAME").unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string());

        let agent_id = match lookup("REPO_STEWARD_AGENT_ID") {
            Some(raw) => match uuid::Uuid::parse_str(raw.trim()) {
                Ok(id) => AgentId::from(id),
                Err(e) => bail!("REPO_STEWARD_AGENT_ID is not a uuid: {}", e),
            },
            None => AgentId::from_name(&agent_name),
        };

        let db_path = lookup("REPO_STEWARD_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("repo-steward")
                    .join("memory.db")
            });

        Ok(Self {
            orchestrator: OrchestratorConfig {
                intervals,
                limits,
                agent_id,
                agent_name,
                debug_dir: lookup("REPO_STEWARD_DEBUG_DIR").map(PathBuf::from),
                api_token: lookup("GITHUB_API_TOKEN"),
            },
            db_path,
            extractor_url: lookup("REPO_STEWARD_EXTRACTOR_URL"),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(token) = &self.orchestrator.api_token {
            if token.trim().is_empty() {
                bail!("GITHUB_API_TOKEN is set but empty");
            }
        }
        if self.orchestrator.agent_name.trim().is_empty() {
            bail!("Agent name must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.orchestrator.intervals, Intervals::default());
        assert_eq!(config.orchestrator.limits, SnapshotLimits::default());
        assert_eq!(config.orchestrator.agent_id, AgentId::from_name("steward"));
        assert!(config.db_path.ends_with("repo-steward/memory.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let config = load(&[
            ("GITHUB_OODA_INTERVAL_MS", "250"),
            ("GITHUB_USER_CHECK_INTERVAL_MS", "0"),
            ("GITHUB_INFO_DISCOVERY_INTERVAL_MS", "soon"),
            ("GITHUB_ISSUES_LIMIT", "3"),
            ("REPO_STEWARD_AGENT_NAME", "maintainer"),
        ])
        .unwrap();

        let intervals = config.orchestrator.intervals;
        assert_eq!(intervals.ooda, Duration::from_millis(250));
        assert_eq!(intervals.user_check, Duration::from_millis(5000));
        assert_eq!(intervals.discovery, Duration::from_millis(1000));
        assert_eq!(config.orchestrator.limits.issues, 3);
        assert_eq!(config.orchestrator.agent_id, AgentId::from_name("maintainer"));
    }

    #[test]
    fn test_api_token_reaches_orchestrator() {
        let config = load(&[("GITHUB_API_TOKEN", "ghp_secret")]).unwrap();
        assert_eq!(config.orchestrator.api_token.as_deref(), Some("ghp_secret"));
        assert!(load(&[]).unwrap().orchestrator.api_token.is_none());
    }

    #[test]
    fn test_validation() {
        assert!(load(&[("GITHUB_API_TOKEN", "  ")]).unwrap().validate().is_err());
        assert!(load(&[("REPO_STEWARD_AGENT_NAME", "")]).unwrap().validate().is_err());
        assert!(load(&[("REPO_STEWARD_AGENT_ID", "not-a-uuid")]).is_err());
    }
}
