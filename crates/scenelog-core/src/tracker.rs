//! The visibility-tracking engine: one idempotent transition function that
//! both live events and inventory polls feed.
//!
//! A source is "active" iff the most recently observed signal for it was
//! "became visible" with no hide since. Repeated signals for the true state
//! never double-count, which is what lets event delivery and polling share
//! one code path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Outcome of feeding one (name, visible) observation through the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The source just became visible; a show should be counted.
    Shown,
    /// The source just became hidden after `duration_secs` on screen.
    Hidden { duration_secs: i64 },
    /// Observation matched the known state. Nothing to record.
    Unchanged,
}

/// Tracks the set of currently-visible named sources and the wall-clock
/// start of each visibility session.
#[derive(Debug, Default)]
pub struct VisibilityTracker {
    active: HashMap<String, DateTime<Utc>>,
}

impl VisibilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one visibility observation.
    ///
    /// Idempotent: a repeated "visible" for an already-active source (or a
    /// "hidden" for an inactive one) is [`Transition::Unchanged`]. On a
    /// hide, the session duration is floored to whole seconds and clamped
    /// to zero.
    pub fn apply(&mut self, name: &str, visible: bool, now: DateTime<Utc>) -> Transition {
        if visible {
            if self.active.contains_key(name) {
                return Transition::Unchanged;
            }
            self.active.insert(name.to_string(), now);
            Transition::Shown
        } else {
            match self.active.remove(name) {
                Some(session_start) => Transition::Hidden {
                    duration_secs: (now - session_start).num_seconds().max(0),
                },
                None => Transition::Unchanged,
            }
        }
    }

    /// Session start for an active source, if any.
    pub fn session_start(&self, name: &str) -> Option<DateTime<Utc>> {
        self.active.get(name).copied()
    }

    /// Names of all currently-active sources, sorted for stable output.
    pub fn active_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    /// Drop every in-progress session without producing durations. Used on
    /// transport loss: interrupted sessions resume as new sessions after
    /// reconnect. Returns the dropped names for logging.
    pub fn clear(&mut self) -> Vec<String> {
        let mut names: Vec<String> = self.active.drain().map(|(name, _)| name).collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn show_then_hide_produces_one_session() {
        let mut tracker = VisibilityTracker::new();
        assert_eq!(tracker.apply("Camera1", true, at(0)), Transition::Shown);
        assert!(tracker.is_active("Camera1"));
        assert_eq!(
            tracker.apply("Camera1", false, at(47)),
            Transition::Hidden { duration_secs: 47 }
        );
        assert!(!tracker.is_active("Camera1"));
    }

    #[test]
    fn repeated_show_is_idempotent_and_keeps_session_start() {
        let mut tracker = VisibilityTracker::new();
        assert_eq!(tracker.apply("Camera1", true, at(0)), Transition::Shown);
        // e.g. a poll result arriving after the live event already recorded it
        assert_eq!(tracker.apply("Camera1", true, at(5)), Transition::Unchanged);
        assert_eq!(tracker.session_start("Camera1"), Some(at(0)));
        // the eventual hide measures from the original show
        assert_eq!(
            tracker.apply("Camera1", false, at(10)),
            Transition::Hidden { duration_secs: 10 }
        );
    }

    #[test]
    fn hide_without_show_is_a_noop() {
        let mut tracker = VisibilityTracker::new();
        assert_eq!(
            tracker.apply("Camera1", false, at(0)),
            Transition::Unchanged
        );
        assert_eq!(
            tracker.apply("Camera1", false, at(1)),
            Transition::Unchanged
        );
    }

    #[test]
    fn poll_and_event_for_the_same_state_converge() {
        // Interleaving a live event and a poll result reporting the same
        // state must end in the same place as either alone.
        let mut tracker = VisibilityTracker::new();
        assert_eq!(tracker.apply("Overlay", true, at(0)), Transition::Shown);
        assert_eq!(tracker.apply("Overlay", true, at(1)), Transition::Unchanged);
        assert_eq!(
            tracker.apply("Overlay", false, at(30)),
            Transition::Hidden { duration_secs: 30 }
        );
        assert_eq!(
            tracker.apply("Overlay", false, at(31)),
            Transition::Unchanged
        );
        assert!(tracker.active_sources().is_empty());
    }

    #[test]
    fn alternating_show_hide_pairs_durations() {
        let mut tracker = VisibilityTracker::new();
        // Camera1: 0..47 and 100..110, the reporting scenario.
        assert_eq!(tracker.apply("Camera1", true, at(0)), Transition::Shown);
        assert_eq!(
            tracker.apply("Camera1", false, at(47)),
            Transition::Hidden { duration_secs: 47 }
        );
        assert_eq!(tracker.apply("Camera1", true, at(100)), Transition::Shown);
        assert_eq!(
            tracker.apply("Camera1", false, at(110)),
            Transition::Hidden { duration_secs: 10 }
        );
    }

    #[test]
    fn duration_is_clamped_to_zero_on_clock_skew() {
        let mut tracker = VisibilityTracker::new();
        tracker.apply("Camera1", true, at(10));
        assert_eq!(
            tracker.apply("Camera1", false, at(7)),
            Transition::Hidden { duration_secs: 0 }
        );
    }

    #[test]
    fn independent_sources_track_independently() {
        let mut tracker = VisibilityTracker::new();
        tracker.apply("A", true, at(0));
        tracker.apply("B", true, at(5));
        assert_eq!(tracker.active_sources(), vec!["A", "B"]);
        assert_eq!(
            tracker.apply("A", false, at(20)),
            Transition::Hidden { duration_secs: 20 }
        );
        assert_eq!(tracker.active_sources(), vec!["B"]);
        assert_eq!(tracker.session_start("B"), Some(at(5)));
    }

    #[test]
    fn clear_drops_sessions_without_durations() {
        let mut tracker = VisibilityTracker::new();
        tracker.apply("A", true, at(0));
        tracker.apply("B", true, at(1));
        assert_eq!(tracker.clear(), vec!["A", "B"]);
        assert!(tracker.active_sources().is_empty());
        // After a "reconnect", the next poll starts a fresh session.
        assert_eq!(tracker.apply("A", true, at(60)), Transition::Shown);
        assert_eq!(tracker.session_start("A"), Some(at(60)));
    }
}
