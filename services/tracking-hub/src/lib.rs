//! Tracking Hub
//!
//! Server-side core of live order tracking: the append-only event store, the
//! per-order channel registry, and the publisher that appends events and fans
//! them out to push connections.
//!
//! # Modules
//! - `store`: Event store trait and in-memory implementation
//! - `backpressure`: Bounded per-connection outbound queues
//! - `registry`: Channel membership and fan-out
//! - `publisher`: Append + fan-out under per-order ordering
//! - `heartbeat`: Missed-ping liveness tracking
//! - `metrics`: Hub counters
//! - `hub`: Facade used by the gateway

pub mod backpressure;
pub mod heartbeat;
pub mod hub;
pub mod metrics;
pub mod publisher;
pub mod registry;
pub mod store;

pub use hub::{ReadError, TrackingHub};
pub use publisher::PublishError;
pub use registry::{ChannelRegistry, ConnectionId, RegistryConfig, Subscription};
pub use store::{EventStore, InMemoryEventStore};
