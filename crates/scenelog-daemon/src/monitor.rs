//! Glue between the pure visibility tracker and its two sinks: the SQLite
//! aggregation store and the observer broadcast channel.
//!
//! Both the event path and the poll path land in [`Monitor::observe`], so
//! repeated reports of the same true state never double-count. The store
//! write and the notification publish happen synchronously in the same turn
//! that computed the transition.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};

use scenelog_core::tracker::{Transition, VisibilityTracker};
use scenelog_core::types::{SourceDayRow, StateNotification};

use crate::store::Store;

/// Shared handle: locked briefly by the connection's event handler and the
/// poll driver, never across an await point.
pub type SharedMonitor = Arc<Mutex<Monitor>>;

pub struct Monitor {
    tracker: VisibilityTracker,
    store: Store,
    notify_tx: broadcast::Sender<StateNotification>,
}

/// Calendar-day key derived from the wall clock at mutation time. A session
/// straddling midnight attributes its count to the show-day and its whole
/// duration to the hide-day.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

impl Monitor {
    pub fn new(store: Store, notify_tx: broadcast::Sender<StateNotification>) -> Self {
        Self {
            tracker: VisibilityTracker::new(),
            store,
            notify_tx,
        }
    }

    pub fn shared(store: Store, notify_tx: broadcast::Sender<StateNotification>) -> SharedMonitor {
        Arc::new(Mutex::new(Self::new(store, notify_tx)))
    }

    /// Feed one (name, visible) observation through the transition engine.
    ///
    /// On a transition the aggregate write and the notification fan-out
    /// happen here, in order. A failed store write is logged and the
    /// in-memory transition stands; the counter under-counts that one event.
    pub fn observe(&mut self, name: &str, visible: bool, now: DateTime<Utc>) {
        let date = day_key(now);
        match self.tracker.apply(name, visible, now) {
            Transition::Shown => {
                info!(source = %name, "source visible");
                if let Err(e) = self.store.increment_show(&date, name, now) {
                    warn!(source = %name, error = %e, "failed to record show");
                }
                self.publish_update(now);
            }
            Transition::Hidden { duration_secs } => {
                info!(source = %name, duration_secs, "source hidden");
                if let Err(e) = self.store.add_duration(&date, name, duration_secs) {
                    warn!(source = %name, error = %e, "failed to record duration");
                }
                self.publish_update(now);
            }
            Transition::Unchanged => {}
        }
    }

    /// Drop every in-progress session without writing durations. Transport
    /// loss semantics: interrupted sessions resume as new sessions after
    /// reconnect.
    pub fn reset(&mut self) {
        let dropped = self.tracker.clear();
        if !dropped.is_empty() {
            info!(sources = ?dropped, "dropping in-progress sessions");
        }
    }

    /// Snapshot sent to a newly connected observer.
    pub fn snapshot(&self, now: DateTime<Utc>) -> StateNotification {
        StateNotification::InitialData {
            data: self.read_today(now),
            active_sources: self.tracker.active_sources(),
            timestamp: now.to_rfc3339(),
        }
    }

    pub fn active_sources(&self) -> Vec<String> {
        self.tracker.active_sources()
    }

    fn read_today(&self, now: DateTime<Utc>) -> Vec<SourceDayRow> {
        match self.store.read_day(&day_key(now)) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to read day snapshot");
                Vec::new()
            }
        }
    }

    fn publish_update(&self, now: DateTime<Utc>) {
        let notification = StateNotification::SourceUpdated {
            data: self.read_today(now),
            active_sources: self.tracker.active_sources(),
            timestamp: now.to_rfc3339(),
        };
        // Fire and forget. No receivers is not an error.
        let _ = self.notify_tx.send(notification);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
