//! scenelog daemon: maintains a persistent obs-websocket control connection,
//! derives source visibility transitions from events and inventory polls,
//! accumulates per-day statistics in SQLite, and fans state changes out to
//! local WebSocket observers.

pub mod connection;
pub mod correlator;
pub mod monitor;
pub mod poller;
pub mod report;
pub mod server;
pub mod store;
