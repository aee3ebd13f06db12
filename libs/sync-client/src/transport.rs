//! Transport seams used by the sync controller
//!
//! The controller only talks to these traits; [`crate::ws`] and
//! [`crate::http`] provide the network implementations and tests plug in
//! scripted fakes.

use async_trait::async_trait;
use tracking_types::ids::OrderCredential;
use tracking_types::message::PushMessage;
use tracking_types::snapshot::Snapshot;

use crate::error::SyncError;

/// Opens push subscriptions.
#[async_trait]
pub trait PushConnector: Send + Sync + 'static {
    /// Connect, send the credential pair and wait for the initial snapshot.
    ///
    /// A rejected credential yields [`SyncError::Authorization`].
    async fn connect(
        &self,
        credential: &OrderCredential,
    ) -> Result<(Box<dyn PushStream>, Snapshot), SyncError>;
}

/// An established push subscription.
#[async_trait]
pub trait PushStream: Send {
    /// Next message from the server; `Ok(None)` once the connection closed.
    async fn next_message(&mut self) -> Result<Option<PushMessage>, SyncError>;

    async fn close(&mut self);
}

/// Request/response snapshot reads, used for cold start and polling.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn fetch_snapshot(&self, credential: &OrderCredential) -> Result<Snapshot, SyncError>;
}
