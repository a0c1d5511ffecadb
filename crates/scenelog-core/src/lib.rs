//! Core domain logic for scenelog: the obs-websocket v5 wire protocol and
//! the source-visibility tracking engine.
//!
//! Pure library — no tokio, no rusqlite, no async. Everything here is
//! exercised by the daemon crate, which supplies the transport, the
//! persistence sink, and the notification fan-out.

pub mod protocol;
pub mod tracker;
pub mod types;
