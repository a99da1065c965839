use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// How long a bulk listing may be used before lookups report "not found"
pub const CACHE_TTL: Duration = Duration::from_secs(2);

/// One backend session as reported by the bulk listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSession {
    pub name: String,
    /// Pane to capture; `None` targets the session itself
    pub pane: Option<String>,
    pub working_dir: String,
    /// Backend activity timestamp, 0 if unknown
    pub activity: u64,
    /// Foreground command of the pane, if the backend reports it
    pub command: Option<String>,
}

#[derive(Debug, Default)]
struct CacheState {
    sessions: HashMap<String, BackendSession>,
    refreshed_at: Option<Instant>,
}

/// Snapshot of a backend's sessions, replaced wholesale on every refresh.
///
/// Lookups against a snapshot older than [`CACHE_TTL`], or one that was
/// cleared after a failed refresh, find nothing.
#[derive(Debug, Default)]
pub struct SessionCache {
    state: RwLock<CacheState>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, sessions: Vec<BackendSession>) {
        self.replace_at(sessions, Instant::now());
    }

    pub(crate) fn replace_at(&self, sessions: Vec<BackendSession>, at: Instant) {
        let sessions = sessions.into_iter().map(|s| (s.name.clone(), s)).collect();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = CacheState {
            sessions,
            refreshed_at: Some(at),
        };
    }

    /// Drop everything; the cache stays unusable until the next successful refresh
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = CacheState::default();
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<BackendSession> {
        self.get_at(name, Instant::now())
    }

    pub(crate) fn get_at(&self, name: &str, now: Instant) -> Option<BackendSession> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if !is_fresh(&state, now) {
            return None;
        }
        state.sessions.get(name).cloned()
    }

    /// Resolve a slug: explicit name, then exact slug, then `slug_`/`slug-` prefix
    pub fn discover(&self, slug: &str, explicit: Option<&str>) -> Option<BackendSession> {
        self.discover_at(slug, explicit, Instant::now())
    }

    pub(crate) fn discover_at(
        &self,
        slug: &str,
        explicit: Option<&str>,
        now: Instant,
    ) -> Option<BackendSession> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if !is_fresh(&state, now) {
            return None;
        }

        if let Some(session) = explicit.and_then(|name| state.sessions.get(name)) {
            return Some(session.clone());
        }

        if let Some(session) = state.sessions.get(slug) {
            return Some(session.clone());
        }

        let underscore = format!("{}_", slug);
        let dash = format!("{}-", slug);
        state
            .sessions
            .values()
            .filter(|s| s.name.starts_with(&underscore) || s.name.starts_with(&dash))
            .min_by(|a, b| a.name.cmp(&b.name))
            .cloned()
    }
}

fn is_fresh(state: &CacheState, now: Instant) -> bool {
    state
        .refreshed_at
        .is_some_and(|at| now.saturating_duration_since(at) <= CACHE_TTL)
}
