//! Concurrent status polling across all monitored sessions.
//!
//! One cycle refreshes every integration's cache once, then fans out one task
//! per session through a bounded worker pool. Each task discovers (or reuses)
//! its handle, queries the backend under its own deadline and reports a
//! [`PollEntry`]. The cycle's [`PollResult`] is only returned after every task
//! has finished, and always has an entry for every submitted session.
//!
//! Trackers are keyed by session id and outlive handles: a session that drops
//! out of the backend for a cycle keeps its debouncing state until it is
//! evicted from the registry.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::actions::Action;
use crate::detect::StateTracker;
use crate::error::MonitorError;
use crate::integration::{Manager, SessionHandle};
use crate::session::{PollEntry, PollResult, SessionDescriptor, Status};

/// Default deadline for one session's status query
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(3);

type SharedTracker = Arc<AsyncMutex<StateTracker>>;

/// Runs poll cycles and owns the per-session trackers and handles between
/// cycles.
pub struct BatchPoller {
    manager: Arc<Manager>,
    workers: usize,
    task_timeout: Duration,
    trackers: HashMap<String, SharedTracker>,
    handles: HashMap<String, SessionHandle>,
}

impl BatchPoller {
    pub fn new(manager: Arc<Manager>, workers: usize) -> Self {
        Self {
            manager,
            workers: workers.max(1),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            trackers: HashMap::new(),
            handles: HashMap::new(),
        }
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Number of sessions with a tracker
    pub fn tracked(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_tracked(&self, session_id: &str) -> bool {
        self.trackers.contains_key(session_id)
    }

    /// Whether a discovered handle is cached for the next cycle
    pub fn has_handle(&self, session_id: &str) -> bool {
        self.handles.contains_key(session_id)
    }

    /// Forget a session removed from the registry, tracker and handle alike
    pub fn evict(&mut self, session_id: &str) -> bool {
        self.handles.remove(session_id);
        let removed = self.trackers.remove(session_id).is_some();
        if removed {
            debug!(session = session_id, "evicted session tracker");
        }
        removed
    }

    /// Evict every tracked session not present in `live`; returns the evicted ids
    pub fn retain(&mut self, live: &[SessionDescriptor]) -> Vec<String> {
        let live: HashSet<&str> = live.iter().map(|d| d.id.as_str()).collect();
        let stale: Vec<String> = self
            .trackers
            .keys()
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &stale {
            self.evict(id);
        }
        stale
    }

    /// Run one poll cycle.
    ///
    /// Dropping the returned future aborts every in-flight task. Handles of
    /// sessions that were in flight are lost and rediscovered next cycle;
    /// their trackers stay registered.
    pub async fn poll(&mut self, sessions: &[SessionDescriptor]) -> PollResult {
        self.manager.refresh_all().await;

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let results = Arc::new(Mutex::new(PollResult::with_capacity(sessions.len())));
        let mut tasks = JoinSet::new();
        let mut submitted: Vec<String> = Vec::with_capacity(sessions.len());
        let mut seen = HashSet::new();

        for desc in sessions.iter().filter(|d| d.monitored) {
            if !seen.insert(desc.id.as_str()) {
                warn!(session = %desc.id, "duplicate session id in poll ignored");
                continue;
            }
            submitted.push(desc.id.clone());

            let cached = self.handles.remove(&desc.id);
            let tracker = Arc::clone(self.trackers.entry(desc.id.clone()).or_default());
            let manager = Arc::clone(&self.manager);
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let timeout = self.task_timeout;
            let desc = desc.clone();

            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                let (entry, handle) = poll_session(&manager, &desc, cached, &tracker, timeout).await;
                results
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(desc.id.clone(), entry);
                (desc.id, handle)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Some(handle))) => {
                    self.handles.insert(id, handle);
                }
                Ok((_, None)) => {}
                Err(e) => warn!("poll worker did not finish: {}", e),
            }
        }

        let mut results = std::mem::take(&mut *results.lock().unwrap_or_else(|e| e.into_inner()));
        for id in submitted {
            results.entry(id.clone()).or_insert_with(|| {
                PollEntry::failed(
                    MonitorError::TaskFailed {
                        session: id,
                        message: "worker aborted".to_string(),
                    },
                    None,
                )
            });
        }

        debug!(
            sessions = results.len(),
            tracked = self.trackers.len(),
            handles = self.handles.len(),
            "poll cycle complete"
        );
        results
    }
}

/// Query one session. Returns the handle to keep for the next cycle, if any.
async fn poll_session(
    manager: &Manager,
    desc: &SessionDescriptor,
    cached: Option<SessionHandle>,
    tracker: &SharedTracker,
    timeout: Duration,
) -> (PollEntry, Option<SessionHandle>) {
    let handle = cached.or_else(|| manager.discover_session(&desc.slug, &desc.metadata));
    let Some(mut handle) = handle else {
        return (PollEntry::ok(Status::Missing, None), None);
    };

    let Some(integration) = manager.integration(&handle.integration) else {
        return (PollEntry::ok(Status::Missing, handle.tool_name()), None);
    };

    let mut tracker = tracker.lock().await;
    let outcome =
        tokio::time::timeout(timeout, integration.get_status(&mut handle, &mut tracker)).await;
    match outcome {
        // Gone from the backend: rediscover next cycle, keep the tracker
        Ok(Ok(Status::Missing)) => (PollEntry::ok(Status::Missing, handle.tool_name()), None),
        Ok(Ok(status)) => {
            let tool = handle.tool_name();
            (PollEntry::ok(status, tool), Some(handle))
        }
        Ok(Err(e)) => {
            warn!(session = %desc.id, "{}", e);
            let tool = handle.tool_name();
            (PollEntry::failed(e, tool), Some(handle))
        }
        Err(_) => {
            warn!(session = %desc.id, timeout_ms = timeout.as_millis() as u64, "status query timed out");
            handle.status = Status::Missing;
            let error = MonitorError::Timeout {
                session: desc.id.clone(),
                after_ms: timeout.as_millis() as u64,
            };
            let tool = handle.tool_name();
            (PollEntry::failed(error, tool), Some(handle))
        }
    }
}

/// Supplies the monitored sessions at the start of every cycle
#[async_trait]
pub trait SessionSource: Send + 'static {
    async fn sessions(&mut self) -> Vec<SessionDescriptor>;
}

#[async_trait]
impl SessionSource for Vec<SessionDescriptor> {
    async fn sessions(&mut self) -> Vec<SessionDescriptor> {
        self.clone()
    }
}

/// Poll on a fixed interval until `shutdown` flips or its sender is dropped.
///
/// Missed ticks are delayed rather than bursted, so cycles never overlap and a
/// session's tracker only ever sees one update at a time.
pub fn spawn_poll_loop<S: SessionSource>(
    mut poller: BatchPoller,
    mut source: S,
    interval: Duration,
    tx: mpsc::UnboundedSender<Action>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let sessions = tokio::select! {
                _ = shutdown.changed() => break,
                sessions = source.sessions() => sessions,
            };
            let evicted = poller.retain(&sessions);
            if !evicted.is_empty() && tx.send(Action::SessionsEvicted(evicted)).is_err() {
                break;
            }

            let result = tokio::select! {
                _ = shutdown.changed() => break,
                result = poller.poll(&sessions) => result,
            };

            if tx.send(Action::PollCompleted(result)).is_err() {
                break;
            }
        }

        info!("poll loop stopped");
    })
}
