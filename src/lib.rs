//! Activity monitoring for AI coding agents running in terminal multiplexer
//! sessions.
//!
//! [`BatchPoller`] drives a poll cycle: it refreshes each [`Integration`]'s
//! session cache once, then queries every session concurrently. Each query
//! captures the pane, classifies it with a [`Detector`] and debounces the
//! result through the session's [`StateTracker`].

pub mod actions;
pub mod config;
pub mod detect;
pub mod error;
pub mod integration;
pub mod poller;
pub mod session;

pub use actions::Action;
pub use config::Config;
pub use detect::{Detector, Signal, StateTracker, Tool};
pub use error::MonitorError;
pub use integration::{Integration, Manager, SessionHandle, TmuxIntegration};
pub use poller::{spawn_poll_loop, BatchPoller, SessionSource};
pub use session::{PollEntry, PollResult, SessionDescriptor, Status};
