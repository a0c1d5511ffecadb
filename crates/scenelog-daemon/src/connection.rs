//! The obs-websocket control connection: socket ownership, the three-step
//! handshake, and inbound frame routing.
//!
//! One connection instance lives for the whole process and reconnects
//! forever on a fixed delay. Within a session, frames are demultiplexed by
//! opcode: handshake frames drive the state machine, responses resolve the
//! correlator, events feed the visibility monitor. Malformed or unexpected
//! frames are logged and dropped without affecting the connection.

use std::time::Duration;

use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use scenelog_core::protocol::{
    encode_identify, parse_frame, scene_item_visibility, InboundFrame,
};

use crate::correlator::RequestCorrelator;
use crate::monitor::SharedMonitor;

/// Fixed delay between reconnect attempts. No backoff growth, no giving up:
/// the endpoint is a LAN-local dependency assumed to be usually available.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection lifecycle. Transitions only move forward, except every state
/// falls back to `Disconnected` on socket loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    AwaitingHello,
    Identifying,
    Ready,
}

pub struct ObsConnection {
    url: String,
    state: ConnectionState,
    /// Outbound application frames, produced by the correlator.
    out_rx: mpsc::Receiver<Message>,
    /// Flipped true on Identified, false on any disconnect. The correlator
    /// gates sends on it; the poll driver watches it for Ready transitions.
    ready_tx: watch::Sender<bool>,
    correlator: RequestCorrelator,
    monitor: SharedMonitor,
}

impl ObsConnection {
    pub fn new(
        url: String,
        out_rx: mpsc::Receiver<Message>,
        ready_tx: watch::Sender<bool>,
        correlator: RequestCorrelator,
        monitor: SharedMonitor,
    ) -> Self {
        Self {
            url,
            state: ConnectionState::Disconnected,
            out_rx,
            ready_tx,
            correlator,
            monitor,
        }
    }

    /// Connect, run the session, clean up, sleep, repeat. Never returns.
    pub async fn run(mut self) {
        loop {
            tracing::info!(url = %self.url, "connecting to OBS");
            match connect_async(self.url.as_str()).await {
                Ok((ws, _response)) => {
                    self.transition(ConnectionState::AwaitingHello);
                    match self.run_session(ws).await {
                        Ok(()) => tracing::info!("connection closed by remote"),
                        Err(e) => tracing::warn!(error = %e, "connection error"),
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "connect failed");
                }
            }

            self.teardown();
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::debug!(from = ?self.state, to = ?next, "connection state change");
        self.state = next;
    }

    /// Socket-loss cleanup: fail in-flight requests, drop in-progress
    /// visibility sessions (no durations written), mark disconnected.
    fn teardown(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnected);
        }
        self.ready_tx.send_replace(false);
        self.correlator.fail_all();
        self.monitor
            .lock()
            .expect("monitor lock poisoned")
            .reset();
    }

    async fn run_session(
        &mut self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                inbound = stream.next() => {
                    let msg = match inbound {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => return Err(e),
                        None => return Ok(()),
                    };
                    match msg {
                        Message::Text(text) => {
                            self.handle_frame(&mut sink, &text).await?;
                        }
                        Message::Ping(data) => sink.send(Message::Pong(data)).await?,
                        Message::Close(_) => return Ok(()),
                        _ => {}
                    }
                }
                outbound = self.out_rx.recv() => {
                    match outbound {
                        // Application frames are only legal once identified.
                        Some(msg) if self.state == ConnectionState::Ready => {
                            sink.send(msg).await?;
                        }
                        Some(_) => {
                            tracing::debug!("dropping outbound frame, connection not ready");
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_frame(
        &mut self,
        sink: &mut WsSink,
        text: &str,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed frame");
                return Ok(());
            }
        };

        match frame {
            InboundFrame::Hello(hello) if self.state == ConnectionState::AwaitingHello => {
                tracing::info!(rpc_version = hello.rpc_version, "Hello received, identifying");
                sink.send(Message::Text(encode_identify())).await?;
                self.transition(ConnectionState::Identifying);
            }
            InboundFrame::Identified if self.state == ConnectionState::Identifying => {
                self.transition(ConnectionState::Ready);
                tracing::info!("identified, connection ready");
                // The poll driver sees this edge and runs one immediate
                // inventory poll.
                self.ready_tx.send_replace(true);
            }
            InboundFrame::Hello(_) | InboundFrame::Identified => {
                tracing::debug!(
                    state = ?self.state,
                    "ignoring handshake frame outside its expected state"
                );
            }
            InboundFrame::Event(event) => match scene_item_visibility(&event) {
                Some((name, visible)) => {
                    self.monitor
                        .lock()
                        .expect("monitor lock poisoned")
                        .observe(&name, visible, Utc::now());
                }
                None => {
                    tracing::debug!(event_type = %event.event_type, "ignoring event");
                }
            },
            InboundFrame::Response(response) => self.correlator.resolve(response),
            InboundFrame::Unknown(op) => {
                tracing::debug!(op, "dropping frame with unknown opcode");
            }
        }
        Ok(())
    }
}
