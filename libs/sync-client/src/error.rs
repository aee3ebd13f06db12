//! Client-side error taxonomy

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracking_types::errors::AuthorizationError;

/// Errors produced by transports and the sync controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Credential pair rejected. Terminal for the session.
    #[error("Tracking info not found")]
    Authorization,

    /// Connection failed to establish or dropped; recovered by reconnecting.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The peer sent something that does not parse as a tracking message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, SyncError::Authorization)
    }
}

impl From<AuthorizationError> for SyncError {
    fn from(_: AuthorizationError) -> Self {
        SyncError::Authorization
    }
}

/// User-facing error carried by the tracking view.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewError {
    #[error("Tracking info not found")]
    NotFound,
}
