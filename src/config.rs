use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::SessionDescriptor;

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "AGENT_PULSE_CONFIG";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interval between poll cycles
    pub poll_interval_ms: u64,
    /// Maximum status queries in flight at once
    pub workers: usize,
    /// Deadline for a single session's status query
    pub task_timeout_ms: u64,
    /// Integrations to use, in discovery order
    pub integrations: Vec<String>,
    /// Path to tmux binary
    pub tmux_path: String,
    /// Log filter used when RUST_LOG is unset
    pub log_level: String,
    /// Sessions to monitor
    pub sessions: Vec<SessionDescriptor>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            workers: 8,
            task_timeout_ms: 3000,
            integrations: vec!["tmux".to_string()],
            tmux_path: "tmux".to_string(),
            log_level: "info".to_string(),
            sessions: Vec::new(),
        }
    }
}

impl Config {
    /// `$AGENT_PULSE_CONFIG`, else `<config dir>/agent-pulse/config.json`
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join("agent-pulse").join("config.json"))
    }

    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&raw, path)
    }

    /// Same as [`Config::load_from`] without blocking the runtime; used for
    /// the per-cycle session reload
    pub async fn reload_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config.sanitized())
    }

    fn sanitized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.poll_interval_ms = self.poll_interval_ms.max(100);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}
