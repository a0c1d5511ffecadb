//! WebSocket fan-out of state notifications to local observers.
//!
//! Observers receive an `initial_data` snapshot on connect and a
//! `source_updated` push on every visibility transition. Delivery is fire
//! and forget: a slow observer's lagged receiver skips notifications, and
//! never blocks the tracking core.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use scenelog_core::types::StateNotification;

use crate::monitor::SharedMonitor;

/// Default maximum number of concurrent observer connections.
const DEFAULT_MAX_CONNECTIONS: usize = 64;

pub struct NotifyServer {
    addr: SocketAddr,
    monitor: SharedMonitor,
    notify_tx: broadcast::Sender<StateNotification>,
    cancel: CancellationToken,
    max_connections: usize,
}

impl NotifyServer {
    pub fn new(
        addr: SocketAddr,
        monitor: SharedMonitor,
        notify_tx: broadcast::Sender<StateNotification>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            monitor,
            notify_tx,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    #[allow(dead_code)]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Bind and run the accept loop until the cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let (listener, _addr) = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "notify server listening");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(peer = %peer, max = self.max_connections, "observer limit reached, rejecting");
                                    drop(stream);
                                    continue;
                                }
                            };
                            let monitor = self.monitor.clone();
                            let notify_rx = self.notify_tx.subscribe();
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                match tokio_tungstenite::accept_async(stream).await {
                                    Ok(ws) => {
                                        if let Err(e) = handle_observer(ws, monitor, notify_rx, cancel).await {
                                            tracing::debug!(peer = %peer, error = %e, "observer handler finished with error");
                                        }
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer, error = %e, "observer handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("notify server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_observer(
    ws: tokio_tungstenite::WebSocketStream<TcpStream>,
    monitor: SharedMonitor,
    mut notify_rx: broadcast::Receiver<StateNotification>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws_tx, mut ws_rx) = ws.split();
    tracing::debug!("observer connected");

    let snapshot = {
        let monitor = monitor.lock().expect("monitor lock poisoned");
        monitor.snapshot(Utc::now())
    };
    ws_tx
        .send(Message::Text(serde_json::to_string(&snapshot)?))
        .await?;

    loop {
        tokio::select! {
            notification = notify_rx.recv() => {
                match notification {
                    Ok(n) => {
                        ws_tx.send(Message::Text(serde_json::to_string(&n)?)).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "observer lagged, notifications skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => ws_tx.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("observer disconnected");
                        return Ok(());
                    }
                    // Observers are listen-only; inbound text is ignored.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Monitor;
    use crate::store::Store;
    use chrono::TimeZone;
    use serde_json::Value;

    async fn start_server() -> (
        SocketAddr,
        SharedMonitor,
        broadcast::Sender<StateNotification>,
        CancellationToken,
    ) {
        let (notify_tx, _) = broadcast::channel(16);
        let monitor = Monitor::shared(Store::open_in_memory().unwrap(), notify_tx.clone());
        let cancel = CancellationToken::new();
        let server = NotifyServer::new(
            "127.0.0.1:0".parse().unwrap(),
            monitor.clone(),
            notify_tx.clone(),
            cancel.clone(),
        );
        let (listener, addr) = server.bind().await.unwrap();
        tokio::spawn(async move { server.serve(listener).await });
        (addr, monitor, notify_tx, cancel)
    }

    #[tokio::test]
    async fn observer_gets_initial_data_then_updates() {
        let (addr, monitor, _notify_tx, cancel) = start_server().await;

        {
            let mut monitor = monitor.lock().unwrap();
            let t0 = Utc.timestamp_opt(1_756_250_000, 0).unwrap();
            monitor.observe("Camera1", true, t0);
        }

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();

        let first: Value =
            serde_json::from_str(ws.next().await.unwrap().unwrap().to_text().unwrap()).unwrap();
        assert_eq!(first["type"], "initial_data");
        assert_eq!(first["activeSources"][0], "Camera1");

        {
            let mut monitor = monitor.lock().unwrap();
            let t1 = Utc.timestamp_opt(1_756_250_047, 0).unwrap();
            monitor.observe("Camera1", false, t1);
        }

        let second: Value =
            serde_json::from_str(ws.next().await.unwrap().unwrap().to_text().unwrap()).unwrap();
        assert_eq!(second["type"], "source_updated");
        assert!(second["activeSources"].as_array().unwrap().is_empty());
        assert_eq!(second["data"][0]["total_duration"], 47);

        cancel.cancel();
    }

    #[tokio::test]
    async fn slow_or_absent_observer_never_blocks_publishing() {
        let (_addr, monitor, _notify_tx, cancel) = start_server().await;

        // Nobody connected: publishing must still be a plain non-blocking call.
        let mut monitor = monitor.lock().unwrap();
        let t0 = Utc.timestamp_opt(1_756_250_000, 0).unwrap();
        for i in 0..100 {
            monitor.observe(&format!("S{i}"), true, t0);
        }
        assert_eq!(monitor.active_sources().len(), 100);

        cancel.cancel();
    }
}
