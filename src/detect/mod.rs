//! Pane content analysis: normalization, classification and debouncing.

mod heuristics;
mod normalize;
mod tracker;

pub use heuristics::{Detector, Signal, Tool, LINE_WINDOW};
pub use normalize::{fingerprint, fingerprint_hex, normalize, strip_ansi, Fingerprint, SPINNER_GLYPHS};
pub use tracker::{StateTracker, SPIKE_THRESHOLD, SPIKE_WINDOW};
