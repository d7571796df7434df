//! Application configuration management.
//!
//! Configuration is layered: built-in defaults, then an optional JSON file at
//! `~/.config/sitecache/config.json` (or `$SITECACHE_CONFIG`), then
//! `SITECACHE_*` environment variables. The binary loads `.env` before this.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sitecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Env var that points at an explicit config file
const CONFIG_PATH_ENV: &str = "SITECACHE_CONFIG";

const DEFAULT_BROKER_URL: &str = "https://trustyvault.brainaihub.tech";
const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";
const DEFAULT_PROVIDER: &str = "microsoft_graph";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker_url: String,
    pub broker_api_key: Option<String>,
    pub provider: String,
    pub graph_url: String,
    pub cache_dir: Option<PathBuf>,
    pub safety_margin_secs: u64,
    pub broker_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub broker_retry: RetryPolicy,
    pub upstream_retry: RetryPolicy,
    pub rate_limit_retry: RetryPolicy,
    pub cleanup_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            broker_api_key: None,
            provider: DEFAULT_PROVIDER.to_string(),
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            cache_dir: None,
            safety_margin_secs: 300,
            broker_timeout_secs: 10,
            request_timeout_secs: 30,
            broker_retry: RetryPolicy::new(3, 500, 4_000),
            upstream_retry: RetryPolicy::new(4, 1_000, 16_000),
            rate_limit_retry: RetryPolicy::new(4, 1_000, 60_000),
            cleanup_interval_secs: 3_600,
        }
    }
}

impl Config {
    /// Load defaults, the config file (if any) and environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SITECACHE_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("SITECACHE_BROKER_URL") {
            self.broker_url = v;
        }
        if let Some(v) = lookup("SITECACHE_BROKER_API_KEY") {
            self.broker_api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = lookup("SITECACHE_PROVIDER") {
            self.provider = v;
        }
        if let Some(v) = lookup("SITECACHE_GRAPH_URL") {
            self.graph_url = v;
        }
        if let Some(v) = lookup("SITECACHE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(v));
        }
        parse_env(&lookup, "SITECACHE_SAFETY_MARGIN_SECS", &mut self.safety_margin_secs)?;
        parse_env(&lookup, "SITECACHE_BROKER_TIMEOUT_SECS", &mut self.broker_timeout_secs)?;
        parse_env(&lookup, "SITECACHE_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;
        parse_env(&lookup, "SITECACHE_CLEANUP_INTERVAL_SECS", &mut self.cleanup_interval_secs)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker_url.trim().is_empty() {
            bail!("broker_url must not be empty");
        }
        if self.graph_url.trim().is_empty() {
            bail!("graph_url must not be empty");
        }
        if self.provider.trim().is_empty() {
            bail!("provider must not be empty");
        }
        for (name, policy) in [
            ("broker_retry", &self.broker_retry),
            ("upstream_retry", &self.upstream_retry),
            ("rate_limit_retry", &self.rate_limit_retry),
        ] {
            if policy.max_attempts == 0 {
                bail!("{}.max_attempts must be at least 1", name);
            }
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted credential entries.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("credentials"))
    }

    pub fn safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.safety_margin_secs).unwrap_or(i64::MAX))
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_secs(self.broker_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn parse_env<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> Result<()>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw))?;
    }
    Ok(())
}
