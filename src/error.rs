use serde::Serialize;
use thiserror::Error;

/// Failures local to one session or one integration.
///
/// None of these abort a poll cycle; they are attached to the affected
/// session's entry or logged against the integration.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorError {
    #[error("integration '{integration}' is not available")]
    Unavailable { integration: String },

    #[error("failed to capture session '{session}': {message}")]
    Capture { session: String, message: String },

    #[error("status query for '{session}' timed out after {after_ms}ms")]
    Timeout { session: String, after_ms: u64 },

    #[error("bulk refresh of '{integration}' failed: {message}")]
    Refresh { integration: String, message: String },

    #[error("worker for '{session}' did not finish: {message}")]
    TaskFailed { session: String, message: String },
}
