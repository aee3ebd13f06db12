//! Types library for live order tracking
//!
//! This library provides the data model shared by the tracking server and the
//! client sync controller, so that both sides fold events into snapshots with
//! exactly the same rules.
//!
//! # Modules
//! - `ids`: Order identifiers and the credential pair (TrackingNumber, PostalCode)
//! - `event`: Append-only tracking events and event drafts
//! - `snapshot`: Derived order snapshot and the event fold
//! - `message`: Push channel wire messages
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod event;
pub mod snapshot;
pub mod message;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::event::*;
    pub use crate::snapshot::*;
    pub use crate::message::*;
    pub use crate::errors::*;
}
