use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::MonitorError;

/// Activity state of a monitored agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Agent is computing (spinner, interrupt hint, streaming output)
    Active,
    /// Agent is blocked on a permission or confirmation dialog
    Approval,
    /// Agent is idle at its prompt
    #[default]
    Ready,
    /// Session could not be found or queried
    Missing,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Active => "active",
            Status::Approval => "approval",
            Status::Ready => "ready",
            Status::Missing => "missing",
        };
        f.write_str(s)
    }
}

/// A session as known to the external session registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Stable identifier used as the key of every poll result
    pub id: String,
    /// Slug used to match backend session names
    pub slug: String,
    /// Free-form metadata; may carry backend session/pane overrides
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Sessions with monitoring turned off are not submitted to a poll
    #[serde(default = "default_monitored")]
    pub monitored: bool,
}

fn default_monitored() -> bool {
    true
}

impl SessionDescriptor {
    pub fn new(id: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slug: slug.into(),
            metadata: HashMap::new(),
            monitored: true,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one session in a poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollEntry {
    pub status: Status,
    /// Name of the agent tool detected in the session, if any
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<MonitorError>,
}

impl PollEntry {
    pub fn ok(status: Status, tool: Option<String>) -> Self {
        Self {
            status,
            tool,
            error: None,
        }
    }

    /// A `Missing` entry carrying the failure that caused it
    pub fn failed(error: MonitorError, tool: Option<String>) -> Self {
        Self {
            status: Status::Missing,
            tool,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregated results of one poll cycle keyed by session id
pub type PollResult = HashMap<String, PollEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults_to_monitored() {
        let desc: SessionDescriptor =
            serde_json::from_str(r#"{"id": "a1", "slug": "feature-x"}"#).unwrap();
        assert!(desc.monitored);
        assert!(desc.metadata.is_empty());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Approval).unwrap(), "\"approval\"");
        assert_eq!(Status::Missing.to_string(), "missing");
    }

    #[test]
    fn test_failed_entry_is_missing() {
        let entry = PollEntry::failed(
            MonitorError::Timeout {
                session: "s".into(),
                after_ms: 10,
            },
            None,
        );
        assert_eq!(entry.status, Status::Missing);
        assert!(entry.is_error());
    }
}
