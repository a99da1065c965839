use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::cache::{BackendSession, SessionCache};
use super::{Integration, SessionHandle};
use crate::detect::StateTracker;
use crate::error::MonitorError;
use crate::session::Status;

/// Metadata key overriding the tmux session name
pub const META_SESSION: &str = "tmux_session";
/// Metadata key overriding the pane to capture
pub const META_PANE: &str = "tmux_pane";

/// How long a positive `tmux -V` result is trusted. A negative result is
/// re-checked on every call.
const AVAILABILITY_TTL: Duration = Duration::from_secs(30);

/// Format of the bulk listing; one line per pane
const LIST_FORMAT: &str = "#{session_name}\t#{pane_id}\t#{window_active}\t#{pane_active}\t#{pane_current_path}\t#{session_activity}\t#{pane_current_command}";

/// tmux backend: bulk `list-panes` once per cycle, `capture-pane` per session
pub struct TmuxIntegration {
    /// Path to tmux binary
    tmux_path: String,
    cache: SessionCache,
    available: AtomicBool,
    checked_at: Mutex<Option<Instant>>,
}

impl TmuxIntegration {
    pub fn new() -> Self {
        Self::with_path("tmux")
    }

    pub fn with_path(tmux_path: impl Into<String>) -> Self {
        Self {
            tmux_path: tmux_path.into(),
            cache: SessionCache::new(),
            available: AtomicBool::new(false),
            checked_at: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Whether the last `tmux -V` is still trusted at `now`
    fn availability_known_at(&self, now: Instant) -> bool {
        let checked_at = *self.checked_at.lock().unwrap_or_else(|e| e.into_inner());
        self.available.load(Ordering::Relaxed)
            && checked_at.is_some_and(|at| now.duration_since(at) < AVAILABILITY_TTL)
    }

    async fn version_runs(&self) -> bool {
        Command::new(&self.tmux_path)
            .arg("-V")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// List every session with its active pane
    async fn list_sessions(&self) -> Result<Vec<BackendSession>> {
        let output = Command::new(&self.tmux_path)
            .args(["list-panes", "-a", "-F", LIST_FORMAT])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to execute tmux list-panes")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running") || stderr.contains("no sessions") {
                return Ok(Vec::new());
            }
            anyhow::bail!("tmux list-panes failed: {}", stderr.trim());
        }

        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Visible screen of a pane with wrapped lines joined
    async fn capture(&self, target: &str) -> Result<String> {
        let output = Command::new(&self.tmux_path)
            .args(["capture-pane", "-p", "-J", "-t", target])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to capture pane")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("capture-pane exited with {}: {}", output.status, stderr.trim());
        }

        let content = String::from_utf8_lossy(&output.stdout);
        Ok(content
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl Default for TmuxIntegration {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Integration for TmuxIntegration {
    fn name(&self) -> &str {
        "tmux"
    }

    fn available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn check_available(&self) -> bool {
        let now = Instant::now();
        if self.availability_known_at(now) {
            return true;
        }

        let available = self.version_runs().await;
        *self.checked_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
        let was = self.available.swap(available, Ordering::Relaxed);
        if was != available {
            if available {
                info!(path = %self.tmux_path, "tmux available");
            } else {
                warn!(path = %self.tmux_path, "tmux no longer runnable");
            }
        }
        available
    }

    async fn refresh_cache(&self) -> Result<(), MonitorError> {
        match self.list_sessions().await {
            Ok(sessions) => {
                debug!(count = sessions.len(), "tmux cache refreshed");
                self.cache.replace(sessions);
                Ok(())
            }
            Err(e) => {
                self.cache.clear();
                Err(MonitorError::Refresh {
                    integration: self.name().to_string(),
                    message: format!("{:#}", e),
                })
            }
        }
    }

    fn discover_session(
        &self,
        slug: &str,
        metadata: &HashMap<String, String>,
    ) -> Option<SessionHandle> {
        let explicit = metadata.get(META_SESSION).map(String::as_str);
        let session = self.cache.discover(slug, explicit)?;
        let pane = metadata.get(META_PANE).cloned().or(session.pane);
        Some(SessionHandle::new(self.name(), session.name, pane))
    }

    async fn get_status(
        &self,
        handle: &mut SessionHandle,
        tracker: &mut StateTracker,
    ) -> Result<Status, MonitorError> {
        let Some(session) = self.cache.get(&handle.session) else {
            handle.status = Status::Missing;
            return Ok(Status::Missing);
        };

        let content = match self.capture(&handle.target()).await {
            Ok(content) => content,
            Err(e) => {
                warn!(session = %handle.session, "capture failed: {:#}", e);
                handle.status = Status::Missing;
                return Err(MonitorError::Capture {
                    session: handle.session.clone(),
                    message: format!("{:#}", e),
                });
            }
        };

        Ok(handle.observe(&content, &session, tracker))
    }
}

/// Collapse per-pane listing lines into one entry per session.
///
/// The active pane of the active window wins; otherwise the first pane listed.
fn parse_listing(stdout: &str) -> Vec<BackendSession> {
    let mut sessions: Vec<BackendSession> = Vec::new();
    let mut index: HashMap<String, (usize, bool)> = HashMap::new();

    for line in stdout.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 7 {
            continue;
        }

        let focused = parts[2] == "1" && parts[3] == "1";
        let entry = BackendSession {
            name: parts[0].to_string(),
            pane: Some(parts[1].to_string()).filter(|p| !p.is_empty()),
            working_dir: parts[4].to_string(),
            activity: parts[5].parse().unwrap_or(0),
            command: Some(parts[6].to_string()).filter(|c| !c.is_empty()),
        };

        match index.get(&entry.name).copied() {
            None => {
                index.insert(entry.name.clone(), (sessions.len(), focused));
                sessions.push(entry);
            }
            Some((pos, false)) if focused => {
                index.insert(entry.name.clone(), (pos, true));
                sessions[pos] = entry;
            }
            Some(_) => {}
        }
    }

    sessions
}
