//! Inventory poll driver.
//!
//! OBS does not reliably push full scene state, so while the connection is
//! ready the poller re-enumerates every scene and every scene item on a
//! fixed interval and feeds the results through the same transition path as
//! live events. The transition engine is idempotent, so polling and event
//! delivery for the same true state never double-count.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

use scenelog_core::protocol::{
    scene_item_states, scene_names, REQUEST_GET_SCENE_ITEM_LIST, REQUEST_GET_SCENE_LIST,
};

use crate::correlator::RequestCorrelator;
use crate::monitor::SharedMonitor;

/// Default time between full inventory sweeps.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ScenePoller {
    correlator: RequestCorrelator,
    ready_rx: watch::Receiver<bool>,
    monitor: SharedMonitor,
    interval: Duration,
}

impl ScenePoller {
    pub fn new(
        correlator: RequestCorrelator,
        ready_rx: watch::Receiver<bool>,
        monitor: SharedMonitor,
        interval: Duration,
    ) -> Self {
        Self {
            correlator,
            ready_rx,
            monitor,
            interval,
        }
    }

    /// Run the polling loop. Each time the connection becomes ready this
    /// polls immediately, then on the fixed interval until readiness drops.
    /// Returns only when the readiness channel is gone.
    pub async fn run(mut self) {
        loop {
            while !*self.ready_rx.borrow_and_update() {
                if self.ready_rx.changed().await.is_err() {
                    return;
                }
            }

            // interval() fires its first tick immediately, which is the
            // one-shot inventory poll required right after the handshake.
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.poll_once().await,
                    changed = self.ready_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !*self.ready_rx.borrow() {
                            tracing::debug!("connection lost, pausing inventory polls");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One full sweep: every scene, then every item within each scene. A
    /// failed request is logged and contributes nothing for this cycle; it
    /// never mutates state and the next cycle proceeds normally.
    pub async fn poll_once(&self) {
        let scenes = match self
            .correlator
            .send_request(REQUEST_GET_SCENE_LIST, json!({}))
            .await
        {
            Ok(data) => scene_names(&data),
            Err(e) => {
                tracing::warn!(error = %e, "GetSceneList failed, skipping cycle");
                return;
            }
        };

        for scene in scenes {
            let data = match self
                .correlator
                .send_request(REQUEST_GET_SCENE_ITEM_LIST, json!({ "sceneName": scene }))
                .await
            {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(scene = %scene, error = %e, "GetSceneItemList failed");
                    continue;
                }
            };

            let now = Utc::now();
            let mut monitor = self.monitor.lock().expect("monitor lock poisoned");
            for (name, visible) in scene_item_states(&data) {
                monitor.observe(&name, visible, now);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
