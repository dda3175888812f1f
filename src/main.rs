//! Repo Steward - Entry Point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use repo_steward::{Config, RemoteExtractor, SqliteMemoryStore, StewardClient};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const EXTRACTOR_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Repo Steward v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: repo-steward");
        println!();
        println!("Environment variables:");
        println!("  REPO_STEWARD_EXTRACTOR_URL          Structured extraction endpoint (required)");
        println!("  REPO_STEWARD_DB_PATH                SQLite memory database");
        println!("  REPO_STEWARD_AGENT_NAME             Agent character name (default: steward)");
        println!("  REPO_STEWARD_AGENT_ID               Agent uuid (default: derived from name)");
        println!("  REPO_STEWARD_DEBUG_DIR              Directory for JSON debug snapshots");
        println!("  REPO_STEWARD_LOG_JSON               Log JSON to stderr when set to 1");
        println!("  GITHUB_USER_CHECK_INTERVAL_MS       Join room scan interval (default: 5000)");
        println!("  GITHUB_INFO_DISCOVERY_INTERVAL_MS   Discovery interval (default: 1000)");
        println!("  GITHUB_REPO_INIT_INTERVAL_MS        Initialization interval (default: 5000)");
        println!("  GITHUB_OODA_INTERVAL_MS             OODA interval (default: 60000)");
        println!("  GITHUB_ISSUES_LIMIT                 Issues snapshot limit (default: 10)");
        println!("  GITHUB_PULL_REQUESTS_LIMIT          Pull requests snapshot limit (default: 10)");
        return Ok(());
    }

    // Setup logging
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let json_logs = std::env::var("REPO_STEWARD_LOG_JSON").map(|v| v == "1").unwrap_or(false);
    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Repo Steward v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    config.validate()?;

    let extractor_url = config
        .extractor_url
        .clone()
        .context("REPO_STEWARD_EXTRACTOR_URL must be set")?;
    let extractor = Arc::new(RemoteExtractor::new(&extractor_url, EXTRACTOR_TIMEOUT)?);

    let store = Arc::new(
        SqliteMemoryStore::open(&config.db_path)
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );

    if config.orchestrator.api_token.is_none() {
        info!("GITHUB_API_TOKEN not set, issue and pull request snapshots are skipped");
    }

    let client = StewardClient::builder(config.orchestrator.clone(), store.clone(), store, extractor).build();
    client.start();

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    client.shutdown().await;

    let stats = client.stats();
    info!(
        "Users started: {}, failed: {}, OODA cycles: {}, actions announced: {}",
        stats.users_started, stats.users_failed, stats.ooda_cycles, stats.actions_announced
    );

    Ok(())
}
