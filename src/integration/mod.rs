//! Terminal multiplexer backends and the manager composing them.

mod cache;
mod tmux;

pub use cache::{BackendSession, SessionCache, CACHE_TTL};
pub use tmux::{TmuxIntegration, META_PANE, META_SESSION};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::detect::{Detector, StateTracker, Tool};
use crate::error::MonitorError;
use crate::session::Status;

/// Capability set of one multiplexer backend
#[async_trait]
pub trait Integration: Send + Sync {
    fn name(&self) -> &str;

    /// Result of the latest availability check
    fn available(&self) -> bool;

    /// Re-check availability and return the result. Backends that cannot
    /// change availability keep the default.
    async fn check_available(&self) -> bool {
        self.available()
    }

    /// Replace the session cache with one bulk listing; clears it on failure
    async fn refresh_cache(&self) -> Result<(), MonitorError>;

    /// Match a slug against the cached sessions. `None` when nothing matches
    /// or the cache is stale.
    fn discover_session(&self, slug: &str, metadata: &HashMap<String, String>)
        -> Option<SessionHandle>;

    /// Capture the session and run it through the session's tracker
    async fn get_status(
        &self,
        handle: &mut SessionHandle,
        tracker: &mut StateTracker,
    ) -> Result<Status, MonitorError>;
}

/// Binding between a session descriptor and a backend session.
///
/// Handles are cheap to rediscover. The session's [`StateTracker`] is owned
/// separately so that losing a handle never resets debouncing.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Name of the integration that discovered the session
    pub integration: String,
    /// Backend session name
    pub session: String,
    pub pane: Option<String>,
    pub tool: Option<Tool>,
    pub status: Status,
}

impl SessionHandle {
    pub fn new(integration: impl Into<String>, session: impl Into<String>, pane: Option<String>) -> Self {
        Self {
            integration: integration.into(),
            session: session.into(),
            pane,
            tool: None,
            status: Status::Ready,
        }
    }

    /// Capture target: the pane when known, else the session
    pub fn target(&self) -> String {
        self.pane.clone().unwrap_or_else(|| self.session.clone())
    }

    pub fn tool_name(&self) -> Option<String> {
        self.tool.map(|t| t.name().to_string())
    }

    /// Classify freshly captured content for this session.
    ///
    /// The tool is detected once per handle.
    pub fn observe(
        &mut self,
        content: &str,
        session: &BackendSession,
        tracker: &mut StateTracker,
    ) -> Status {
        if self.tool.is_none() {
            let tool = Tool::detect(session.command.as_deref(), content);
            if tool != Tool::Unknown {
                debug!(session = %self.session, tool = tool.name(), "tool detected");
                self.tool = Some(tool);
            }
        }

        let detector = Detector::new(self.tool.unwrap_or_default());
        self.status = tracker.update(content, session.activity, &detector);
        self.status
    }
}

/// Ordered set of enabled integrations
pub struct Manager {
    enabled: Vec<String>,
    integrations: HashMap<String, Arc<dyn Integration>>,
}

impl Manager {
    pub fn new(enabled: Vec<String>) -> Self {
        Self {
            enabled,
            integrations: HashMap::new(),
        }
    }

    /// Build the manager with every backend named in the config
    pub fn from_config(config: &Config) -> Self {
        let mut manager = Self::new(config.integrations.clone());
        for name in &config.integrations {
            match name.as_str() {
                "tmux" => manager.register(Arc::new(TmuxIntegration::with_path(&config.tmux_path))),
                other => warn!(integration = other, "unknown integration ignored"),
            }
        }
        manager
    }

    pub fn register(&mut self, integration: Arc<dyn Integration>) {
        self.integrations
            .insert(integration.name().to_string(), integration);
    }

    pub fn integration(&self, name: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(name).cloned()
    }

    /// Enabled and registered integrations, in configured order
    fn registered(&self) -> impl Iterator<Item = &Arc<dyn Integration>> {
        self.enabled
            .iter()
            .filter_map(|name| self.integrations.get(name))
    }

    /// Enabled, registered and available integrations, in configured order
    pub fn enabled_integrations(&self) -> Vec<Arc<dyn Integration>> {
        self.registered()
            .filter(|integration| {
                let available = integration.available();
                if !available {
                    debug!(integration = integration.name(), "integration unavailable");
                }
                available
            })
            .cloned()
            .collect()
    }

    /// First match across enabled integrations
    pub fn discover_session(
        &self,
        slug: &str,
        metadata: &HashMap<String, String>,
    ) -> Option<SessionHandle> {
        self.enabled_integrations()
            .iter()
            .find_map(|integration| integration.discover_session(slug, metadata))
    }

    /// Re-check every enabled integration; returns the ones now available
    pub async fn check_availability(&self) -> Vec<Arc<dyn Integration>> {
        let mut available = Vec::new();
        for integration in self.registered() {
            if integration.check_available().await {
                available.push(Arc::clone(integration));
            }
        }
        available
    }

    /// Re-check availability, then refresh every available integration's
    /// cache once. Unavailable integrations and failed refreshes are reported;
    /// neither stops the other integrations.
    pub async fn refresh_all(&self) -> Vec<MonitorError> {
        let mut errors = Vec::new();
        for integration in self.registered() {
            if !integration.check_available().await {
                debug!(integration = integration.name(), "integration unavailable");
                errors.push(MonitorError::Unavailable {
                    integration: integration.name().to_string(),
                });
                continue;
            }
            if let Err(e) = integration.refresh_cache().await {
                warn!(integration = integration.name(), "{}", e);
                errors.push(e);
            }
        }
        errors
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeIntegration, FakeSession};
    use super::*;
    use std::sync::atomic::Ordering;

    fn manager(integrations: Vec<FakeIntegration>, enabled: &[&str]) -> Manager {
        let mut manager = Manager::new(enabled.iter().map(|s| s.to_string()).collect());
        for integration in integrations {
            manager.register(Arc::new(integration));
        }
        manager
    }

    #[test]
    fn test_enabled_integrations_filters_and_orders() {
        let offline = FakeIntegration::new("offline").with_available(false);
        let manager = manager(
            vec![FakeIntegration::new("a"), FakeIntegration::new("b"), offline],
            &["b", "offline", "a", "unregistered"],
        );

        let names: Vec<String> = manager
            .enabled_integrations()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_disabled_integration_is_skipped() {
        let manager = manager(vec![FakeIntegration::new("a")], &[]);
        assert!(manager.enabled_integrations().is_empty());
    }

    #[tokio::test]
    async fn test_discover_returns_first_match_in_order() {
        let first = FakeIntegration::new("first").with_session("api", FakeSession::showing("❯"));
        let second = FakeIntegration::new("second")
            .with_session("api", FakeSession::showing("❯"))
            .with_session("web", FakeSession::showing("❯"));
        let manager = manager(vec![first, second], &["first", "second"]);

        // Caches are empty until refreshed
        assert!(manager.discover_session("api", &HashMap::new()).is_none());

        assert!(manager.refresh_all().await.is_empty());
        let api = manager.discover_session("api", &HashMap::new()).unwrap();
        assert_eq!(api.integration, "first");
        let web = manager.discover_session("web", &HashMap::new()).unwrap();
        assert_eq!(web.integration, "second");
        assert!(manager.discover_session("nope", &HashMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_isolated() {
        let broken = FakeIntegration::new("broken")
            .with_session("api", FakeSession::showing("❯"))
            .with_failing_refresh();
        let healthy = FakeIntegration::new("healthy").with_session("web", FakeSession::showing("❯"));
        let manager = manager(vec![broken, healthy], &["broken", "healthy"]);

        let errors = manager.refresh_all().await;
        assert_eq!(errors.len(), 1);
        assert!(manager.discover_session("api", &HashMap::new()).is_none());
        assert!(manager.discover_session("web", &HashMap::new()).is_some());
    }

    #[tokio::test]
    async fn test_unavailable_integration_is_reported_and_recovers() {
        let flaky = Arc::new(
            FakeIntegration::new("flaky")
                .with_session("api", FakeSession::showing("❯"))
                .with_available(false),
        );
        let mut manager = Manager::new(vec!["flaky".to_string()]);
        manager.register(flaky.clone());

        let errors = manager.refresh_all().await;
        assert_eq!(
            errors,
            vec![MonitorError::Unavailable {
                integration: "flaky".to_string()
            }]
        );
        assert_eq!(*flaky.refreshes.lock().unwrap(), 0);
        assert!(manager.discover_session("api", &HashMap::new()).is_none());
        assert!(manager.check_availability().await.is_empty());

        flaky.available.store(true, Ordering::SeqCst);
        assert!(manager.refresh_all().await.is_empty());
        assert!(manager.discover_session("api", &HashMap::new()).is_some());
        assert_eq!(manager.check_availability().await.len(), 1);
    }

    #[test]
    fn test_handle_records_tool_once() {
        let mut handle = SessionHandle::new("tmux", "api", None);
        let mut tracker = StateTracker::new();
        let session = BackendSession {
            name: "api".into(),
            pane: None,
            working_dir: "/".into(),
            activity: 5,
            command: Some("codex".into()),
        };

        assert_eq!(handle.observe("⠙ Working...", &session, &mut tracker), Status::Active);
        assert_eq!(handle.tool, Some(Tool::Codex));

        let renamed = BackendSession {
            command: Some("claude".into()),
            ..session
        };
        assert_eq!(handle.observe("Done.\n❯", &renamed, &mut tracker), Status::Ready);
        assert_eq!(handle.tool_name().as_deref(), Some("codex"));
        assert_eq!(handle.status, Status::Ready);
    }
}
