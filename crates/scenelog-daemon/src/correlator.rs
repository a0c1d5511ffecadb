//! Request/response correlation for the obs-websocket control connection.
//!
//! Each outbound request carries a fresh correlation id and registers a
//! oneshot continuation; the connection's read loop resolves it when the
//! matching op-7 frame arrives. Multiple requests may be in flight and
//! responses may arrive out of order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;

use scenelog_core::protocol::{encode_request, ResponsePayload};

/// How long a request may wait for its response before failing.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("connection not ready")]
    NotReady,

    #[error("request timed out")]
    Timeout,

    #[error("remote rejected request with code {0}")]
    Remote(i64),

    #[error("transport lost")]
    TransportLost,
}

type Waiter = oneshot::Sender<Result<Value, RequestError>>;

struct Inner {
    out_tx: mpsc::Sender<Message>,
    ready_rx: watch::Receiver<bool>,
    /// In-flight requests by correlation id. At most one entry per id; an
    /// id is never reused while pending.
    pending: Mutex<HashMap<String, Waiter>>,
    next_id: AtomicU64,
}

/// Cheap-to-clone handle; all clones share one pending table and id counter.
#[derive(Clone)]
pub struct RequestCorrelator {
    inner: Arc<Inner>,
}

impl RequestCorrelator {
    pub fn new(out_tx: mpsc::Sender<Message>, ready_rx: watch::Receiver<bool>) -> Self {
        Self {
            inner: Arc::new(Inner {
                out_tx,
                ready_rx,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Send a typed request and wait for its correlated response.
    ///
    /// Fails immediately with [`RequestError::NotReady`] unless the
    /// handshake has completed. Fails with [`RequestError::Timeout`] when no
    /// matching response arrives within [`REQUEST_TIMEOUT`]; a response
    /// arriving after that is ignored.
    pub async fn send_request(
        &self,
        request_type: &str,
        request_data: Value,
    ) -> Result<Value, RequestError> {
        if !*self.inner.ready_rx.borrow() {
            return Err(RequestError::NotReady);
        }

        let id = format!("req-{}", self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id.clone(), tx);

        let frame = encode_request(request_type, &id, request_data);
        if self.inner.out_tx.send(Message::Text(frame)).await.is_err() {
            self.lock_pending().remove(&id);
            return Err(RequestError::TransportLost);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Waiter dropped without an outcome: the connection died.
            Ok(Err(_)) => Err(RequestError::TransportLost),
            Err(_) => {
                self.lock_pending().remove(&id);
                tracing::debug!(request_id = %id, request_type, "request timed out");
                Err(RequestError::Timeout)
            }
        }
    }

    /// Resolve the pending request matching an op-7 frame, if any. A late
    /// response whose caller already timed out finds no entry and is dropped.
    pub fn resolve(&self, response: ResponsePayload) {
        let waiter = self.lock_pending().remove(&response.request_id);
        match waiter {
            Some(tx) => {
                let outcome = if response.request_status.result {
                    Ok(response.response_data.unwrap_or(Value::Null))
                } else {
                    Err(RequestError::Remote(response.request_status.code.unwrap_or(0)))
                };
                // The caller may have been dropped concurrently; nothing to do then.
                let _ = tx.send(outcome);
            }
            None => {
                tracing::debug!(request_id = %response.request_id, "dropping unmatched response");
            }
        }
    }

    /// Fail every in-flight request with [`RequestError::TransportLost`].
    /// Called by the connection on socket loss.
    pub fn fail_all(&self) {
        let drained: Vec<(String, Waiter)> = self.lock_pending().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing in-flight requests, transport lost");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(RequestError::TransportLost));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Waiter>> {
        self.inner.pending.lock().expect("pending table lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use scenelog_core::protocol::RequestStatus;
    use serde_json::json;

    fn setup(ready: bool) -> (RequestCorrelator, mpsc::Receiver<Message>, watch::Sender<bool>) {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (ready_tx, ready_rx) = watch::channel(ready);
        (RequestCorrelator::new(out_tx, ready_rx), out_rx, ready_tx)
    }

    /// Pull the correlation id out of an outbound request frame.
    fn request_id_of(msg: &Message) -> String {
        let frame: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
        frame["d"]["requestId"].as_str().unwrap().to_string()
    }

    fn success_response(request_id: &str, data: Value) -> ResponsePayload {
        ResponsePayload {
            request_id: request_id.to_string(),
            request_status: RequestStatus {
                result: true,
                code: None,
            },
            response_data: Some(data),
        }
    }

    #[tokio::test]
    async fn not_ready_fails_immediately() {
        let (correlator, _out_rx, _ready_tx) = setup(false);
        let result = correlator.send_request("GetSceneList", json!({})).await;
        assert_eq!(result.unwrap_err(), RequestError::NotReady);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_resolves_matching_request() {
        let (correlator, mut out_rx, _ready_tx) = setup(true);

        let handle = {
            let c = correlator.clone();
            tokio::spawn(async move { c.send_request("GetSceneList", json!({})).await })
        };

        let sent = out_rx.recv().await.unwrap();
        let id = request_id_of(&sent);
        correlator.resolve(success_response(&id, json!({"scenes": []})));

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result["scenes"], json!([]));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn remote_failure_carries_status_code() {
        let (correlator, mut out_rx, _ready_tx) = setup(true);

        let handle = {
            let c = correlator.clone();
            tokio::spawn(async move { c.send_request("GetSceneItemList", json!({})).await })
        };

        let id = request_id_of(&out_rx.recv().await.unwrap());
        correlator.resolve(ResponsePayload {
            request_id: id,
            request_status: RequestStatus {
                result: false,
                code: Some(604),
            },
            response_data: None,
        });

        assert_eq!(handle.await.unwrap().unwrap_err(), RequestError::Remote(604));
    }

    #[tokio::test]
    async fn responses_may_arrive_out_of_order() {
        let (correlator, mut out_rx, _ready_tx) = setup(true);

        let first = {
            let c = correlator.clone();
            tokio::spawn(async move { c.send_request("GetSceneList", json!({})).await })
        };
        let id1 = request_id_of(&out_rx.recv().await.unwrap());
        let second = {
            let c = correlator.clone();
            tokio::spawn(async move { c.send_request("GetSceneList", json!({})).await })
        };
        let id2 = request_id_of(&out_rx.recv().await.unwrap());
        assert_ne!(id1, id2);
        assert_eq!(correlator.pending_count(), 2);

        correlator.resolve(success_response(&id2, json!({"n": 2})));
        correlator.resolve(success_response(&id1, json!({"n": 1})));

        assert_eq!(first.await.unwrap().unwrap()["n"], 1);
        assert_eq!(second.await.unwrap().unwrap()["n"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_only_that_request() {
        let (correlator, mut out_rx, _ready_tx) = setup(true);

        // No response arrives: paused time fast-forwards through the 3s timer.
        let stalled = {
            let c = correlator.clone();
            tokio::spawn(async move { c.send_request("GetSceneList", json!({})).await })
        };
        let stale_id = request_id_of(&out_rx.recv().await.unwrap());
        assert_eq!(stalled.await.unwrap().unwrap_err(), RequestError::Timeout);
        assert_eq!(correlator.pending_count(), 0);

        // A late response for the timed-out id is ignored without effect.
        correlator.resolve(success_response(&stale_id, json!({})));

        // A subsequent unrelated request on the same connection succeeds.
        let handle = {
            let c = correlator.clone();
            tokio::spawn(async move { c.send_request("GetSceneList", json!({})).await })
        };
        let id = request_id_of(&out_rx.recv().await.unwrap());
        correlator.resolve(success_response(&id, json!({"ok": true})));
        assert_eq!(handle.await.unwrap().unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn fail_all_rejects_every_pending_request() {
        let (correlator, mut out_rx, _ready_tx) = setup(true);

        let a = {
            let c = correlator.clone();
            tokio::spawn(async move { c.send_request("GetSceneList", json!({})).await })
        };
        let b = {
            let c = correlator.clone();
            tokio::spawn(async move { c.send_request("GetSceneList", json!({})).await })
        };
        out_rx.recv().await.unwrap();
        out_rx.recv().await.unwrap();

        correlator.fail_all();

        assert_eq!(a.await.unwrap().unwrap_err(), RequestError::TransportLost);
        assert_eq!(b.await.unwrap().unwrap_err(), RequestError::TransportLost);
        assert_eq!(correlator.pending_count(), 0);
    }
}
