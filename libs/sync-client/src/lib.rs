//! Client sync library for live order tracking
//!
//! Keeps one client's view of an order consistent while the push channel
//! comes and goes: it subscribes over WebSocket, retries with a bounded
//! fixed backoff, falls back to polling the snapshot API and merges
//! everything into one monotonic view.
//!
//! # Modules
//! - `merge`: Snapshot and timeline merger
//! - `controller`: Connection state machine and control loop
//! - `session`: One active controller per displayed order
//! - `backoff`: Bounded reconnect policy
//! - `state`: Connection states exposed to the UI
//! - `transport`: Push and snapshot seams
//! - `ws`: WebSocket push transport
//! - `http`: HTTP snapshot transport
//! - `config`: Timing configuration
//! - `error`: Error types

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod merge;
pub mod session;
pub mod state;
pub mod transport;
pub mod ws;

pub use config::SyncConfig;
pub use controller::{spawn, SyncHandle, TrackingView};
pub use error::{SyncError, ViewError};
pub use http::HttpSnapshotClient;
pub use merge::{merge, ClientSyncState, Incoming, MergeOutcome, MergeStats, StaleReason};
pub use session::TrackingSession;
pub use state::ConnectionState;
pub use transport::{PushConnector, PushStream, SnapshotSource};
pub use ws::WsConnector;

pub const LIB_VERSION: &str = "1.0.0";
