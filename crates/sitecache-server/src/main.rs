//! Sitecache - SharePoint tools for agents, authenticated through a token broker.
//!
//! Serves JSON-RPC over stdio. Logs go to stderr (and optionally a daily
//! rolling file) because stdout carries protocol messages.

mod prompts;
mod server;
mod tools;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sitecache_core::{Config, CredentialStore, Operations};
use tokio::io::BufReader;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use server::Server;

// ============================================================================
// Constants
// ============================================================================

/// Fallback log level variable, used when RUST_LOG is unset
const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Directory for an additional rolling log file
const LOG_DIR_ENV: &str = "SITECACHE_LOG_DIR";

const LOG_FILE_NAME: &str = "sitecache.log";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Result<Option<WorkerGuard>> {
    // RUST_LOG wins; LOG_LEVEL (e.g. LOG_LEVEL=debug) is the simpler fallback
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var(LOG_LEVEL_ENV)
            .map(|l| l.to_ascii_lowercase())
            .unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let dir = PathBuf::from(dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing()?;
    let config = Config::load().context("Failed to load configuration")?;

    // Check for CLI commands
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("--cache-stats") => return cache_stats(&config),
        Some("--cleanup") => return cleanup(&config),
        Some(other) => bail!("Unknown argument: {} (expected --cache-stats or --cleanup)", other),
        None => {}
    }

    info!(
        broker = %config.broker_url,
        upstream = %config.graph_url,
        provider = %config.provider,
        "Sitecache starting"
    );
    let operations = Operations::from_config(&config)?;

    let store = Arc::clone(operations.store());
    match store.cleanup_expired() {
        Ok(removed) => info!(removed, dir = %store.dir().display(), "Credential store ready"),
        Err(e) => warn!(error = %e, "Startup cleanup failed"),
    }
    let cleanup_task = spawn_cleanup(store, config.cleanup_interval());

    let server = Arc::new(Server::new(operations));
    let result = server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    if let Some(task) = cleanup_task {
        task.abort();
    }
    info!("Sitecache shutting down");
    result
}

/// Remove expired credentials every `every`; disabled when zero
fn spawn_cleanup(store: Arc<CredentialStore>, every: Duration) -> Option<tokio::task::JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately; startup already cleaned
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.cleanup_expired() {
                Ok(0) => debug!("Background cleanup: nothing expired"),
                Ok(removed) => info!(removed, "Background cleanup removed expired credentials"),
                Err(e) => warn!(error = %e, "Background cleanup failed"),
            }
        }
    }))
}

fn open_store(config: &Config) -> Result<CredentialStore> {
    let dir = config.cache_dir()?;
    CredentialStore::open(dir.clone(), config.safety_margin())
        .with_context(|| format!("Failed to open credential store at {}", dir.display()))
}

/// Print store statistics as JSON
fn cache_stats(config: &Config) -> Result<()> {
    let stats = open_store(config)?.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Run one cleanup pass
fn cleanup(config: &Config) -> Result<()> {
    let removed = open_store(config)?.cleanup_expired()?;
    eprintln!("Removed {} expired credential(s)", removed);
    Ok(())
}
