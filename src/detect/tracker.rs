use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::heuristics::{Detector, Signal};
use super::normalize::{fingerprint, fingerprint_hex, normalize, strip_ansi, Fingerprint};
use crate::session::Status;

/// Window in which activity changes must cluster to count as a spike
pub const SPIKE_WINDOW: Duration = Duration::from_secs(1);

/// Activity changes inside [`SPIKE_WINDOW`] needed to consider `Active`
pub const SPIKE_THRESHOLD: u32 = 2;

/// Debounced status of one monitored session.
///
/// Explicit content signals win immediately. Without one, a change in the
/// backend activity timestamp is only trusted when it repeats inside the spike
/// window and the capture still shows a busy hint; single bumps from cursor
/// blinks, redraws or resizes never flip the session to `Active`.
///
/// Not synchronized: callers must not run two updates on one tracker at once.
#[derive(Debug, Clone)]
pub struct StateTracker {
    last_fingerprint: Option<Fingerprint>,
    last_confirmed_at: Option<Instant>,
    last_activity: Option<u64>,
    window_start: Option<Instant>,
    spike_count: u32,
    status: Status,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            last_fingerprint: None,
            last_confirmed_at: None,
            last_activity: None,
            window_start: None,
            spike_count: 0,
            status: Status::Ready,
        }
    }

    /// Last stable status
    pub fn status(&self) -> Status {
        self.status
    }

    /// When `Active` was last confirmed by a busy signal
    pub fn last_confirmed_at(&self) -> Option<Instant> {
        self.last_confirmed_at
    }

    /// Feed one capture. `activity` is the backend's activity timestamp, 0 if unknown.
    pub fn update(&mut self, content: &str, activity: u64, detector: &Detector) -> Status {
        self.update_at(content, activity, detector, Instant::now())
    }

    pub fn update_at(
        &mut self,
        content: &str,
        activity: u64,
        detector: &Detector,
        now: Instant,
    ) -> Status {
        let content = strip_ansi(content);

        let fp = fingerprint(&normalize(&content));
        let content_changed = self.last_fingerprint != Some(fp);
        if content_changed {
            trace!(fingerprint = %fingerprint_hex(&fp), "content changed");
        }
        self.last_fingerprint = Some(fp);

        match detector.classify(&content) {
            Signal::Approval => {
                self.last_activity = Some(activity);
                self.reset_window();
                self.settle(Status::Approval)
            }
            Signal::Busy => {
                self.last_activity = Some(activity);
                self.last_confirmed_at = Some(now);
                self.reset_window();
                self.settle(Status::Active)
            }
            Signal::Ready => {
                self.last_activity = Some(activity);
                self.reset_window();
                self.settle(Status::Ready)
            }
            Signal::None => self.filter_spike(&content, activity, content_changed, detector, now),
        }
    }

    fn filter_spike(
        &mut self,
        content: &str,
        activity: u64,
        content_changed: bool,
        detector: &Detector,
        now: Instant,
    ) -> Status {
        let Some(previous) = self.last_activity.replace(activity) else {
            return self.settle(Status::Ready);
        };

        // Backends that cannot report activity fall back to content changes
        let changed = if activity == 0 && previous == 0 {
            content_changed
        } else {
            activity != previous
        };

        if changed {
            match self.window_start {
                Some(start) if now.duration_since(start) <= SPIKE_WINDOW => self.spike_count += 1,
                _ => {
                    self.window_start = Some(now);
                    self.spike_count = 1;
                }
            }

            if self.spike_count >= SPIKE_THRESHOLD {
                self.reset_window();
                if detector.has_busy_hint(content) {
                    self.last_confirmed_at = Some(now);
                    return self.settle(Status::Active);
                }
                debug!(status = %self.status, "activity spike without busy hint ignored");
            }
            return self.status;
        }

        match self.window_start {
            Some(start) if now.duration_since(start) <= SPIKE_WINDOW => self.status,
            _ => {
                self.reset_window();
                self.settle(Status::Ready)
            }
        }
    }

    fn reset_window(&mut self) {
        self.window_start = None;
        self.spike_count = 0;
    }

    fn settle(&mut self, status: Status) -> Status {
        if status != self.status {
            debug!(from = %self.status, to = %status, "status transition");
            self.status = status;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "streaming output line";

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Plain tail with a busy hint scrolled above the line window
    fn scrolled_busy_hint() -> String {
        let mut content = String::from("Thinking with 1200 tokens so far\n");
        for i in 0..20 {
            content.push_str(&format!("generated {}\n", i));
        }
        content
    }

    #[test]
    fn test_initial_state_is_ready() {
        assert_eq!(StateTracker::new().status(), Status::Ready);
    }

    #[test]
    fn test_explicit_signals_apply_immediately() {
        let detector = Detector::default();
        let mut tracker = StateTracker::new();
        let t0 = Instant::now();

        assert_eq!(
            tracker.update_at("⠙ Processing your request...", 1, &detector, t0),
            Status::Active
        );
        assert_eq!(tracker.last_confirmed_at(), Some(t0));
        assert_eq!(
            tracker.update_at("Yes, allow once\nYes, allow always", 1, &detector, t0 + ms(10)),
            Status::Approval
        );
        assert_eq!(tracker.update_at("Done.\n❯", 1, &detector, t0 + ms(20)), Status::Ready);
    }

    #[test]
    fn test_first_observation_without_signal_is_ready() {
        let mut tracker = StateTracker::new();
        assert_eq!(
            tracker.update_at(PLAIN, 42, &Detector::default(), Instant::now()),
            Status::Ready
        );
    }

    #[test]
    fn test_single_activity_change_never_activates() {
        let detector = Detector::default();
        let mut tracker = StateTracker::new();
        let t0 = Instant::now();

        tracker.update_at(PLAIN, 1, &detector, t0);
        assert_eq!(tracker.update_at(PLAIN, 2, &detector, t0 + ms(100)), Status::Ready);
        assert_eq!(tracker.update_at(PLAIN, 2, &detector, t0 + ms(300)), Status::Ready);
        // Window expires with a single change and closes
        assert_eq!(tracker.update_at(PLAIN, 2, &detector, t0 + ms(1500)), Status::Ready);
        assert_eq!(tracker.window_start, None);
    }

    #[test]
    fn test_two_changes_with_busy_hint_activate() {
        let detector = Detector::default();
        let mut tracker = StateTracker::new();
        let t0 = Instant::now();
        let busy = scrolled_busy_hint();

        assert_eq!(detector.classify(&busy), Signal::None);
        tracker.update_at(PLAIN, 1, &detector, t0);
        assert_eq!(tracker.update_at(PLAIN, 2, &detector, t0 + ms(200)), Status::Ready);
        assert_eq!(tracker.update_at(&busy, 3, &detector, t0 + ms(500)), Status::Active);
        assert_eq!(tracker.window_start, None);
        assert_eq!(tracker.spike_count, 0);
    }

    #[test]
    fn test_two_changes_without_busy_hint_reset_window() {
        let detector = Detector::default();
        let mut tracker = StateTracker::new();
        let t0 = Instant::now();

        tracker.update_at(PLAIN, 1, &detector, t0);
        tracker.update_at(PLAIN, 2, &detector, t0 + ms(200));
        assert_eq!(tracker.update_at(PLAIN, 3, &detector, t0 + ms(400)), Status::Ready);
        assert_eq!(tracker.window_start, None);
        assert_eq!(tracker.spike_count, 0);
    }

    #[test]
    fn test_changes_outside_window_restart_count() {
        let detector = Detector::default();
        let mut tracker = StateTracker::new();
        let t0 = Instant::now();
        let busy = scrolled_busy_hint();

        tracker.update_at(PLAIN, 1, &detector, t0);
        tracker.update_at(PLAIN, 2, &detector, t0 + ms(100));
        // Second change arrives after the window lapsed: starts a new window
        assert_eq!(tracker.update_at(&busy, 3, &detector, t0 + ms(1300)), Status::Ready);
        assert_eq!(tracker.spike_count, 1);
    }

    #[test]
    fn test_open_window_holds_previous_status() {
        let detector = Detector::default();
        let mut tracker = StateTracker::new();
        let t0 = Instant::now();

        tracker.update_at("⠙ Working...", 1, &detector, t0);
        assert_eq!(tracker.status(), Status::Active);

        // Spinner gone, one activity bump: held while the window is open
        assert_eq!(tracker.update_at(PLAIN, 2, &detector, t0 + ms(100)), Status::Active);
        assert_eq!(tracker.update_at(PLAIN, 2, &detector, t0 + ms(600)), Status::Active);
        // Quiet past the window: settles back to ready
        assert_eq!(tracker.update_at(PLAIN, 2, &detector, t0 + ms(1200)), Status::Ready);
    }

    #[test]
    fn test_unknown_activity_uses_content_changes() {
        let detector = Detector::default();
        let mut tracker = StateTracker::new();
        let t0 = Instant::now();
        let busy = scrolled_busy_hint();

        tracker.update_at(PLAIN, 0, &detector, t0);
        assert_eq!(tracker.update_at("more output", 0, &detector, t0 + ms(100)), Status::Ready);
        assert_eq!(tracker.update_at(&busy, 0, &detector, t0 + ms(300)), Status::Active);
    }

    #[test]
    fn test_spinner_frames_are_not_content_changes() {
        let detector = Detector::default();
        let mut tracker = StateTracker::new();
        let t0 = Instant::now();

        tracker.update_at("│ ⠋ panel", 0, &detector, t0);
        tracker.update_at("│ ⠙ panel", 0, &detector, t0 + ms(100));
        assert_eq!(tracker.window_start, None);
    }
}
