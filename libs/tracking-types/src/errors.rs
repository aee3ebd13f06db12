//! Error types for order tracking
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Malformed credential components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Invalid tracking number: {0}")]
    InvalidTrackingNumber(String),

    #[error("Invalid postal code: {0}")]
    InvalidPostalCode(String),
}

/// Event store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Event store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Order not found: {tracking_number}")]
    UnknownOrder { tracking_number: String },

    #[error("Order already registered: {tracking_number}")]
    AlreadyRegistered { tracking_number: String },

    #[error("Tracking stream closed for {tracking_number}: order is {status}")]
    StreamClosed { tracking_number: String, status: String },

    #[error("Invalid event: {reason}")]
    InvalidEvent { reason: String },
}

impl StoreError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Reasons a request for tracking data is refused.
///
/// A single variant on purpose: a wrong postal code and an unknown tracking
/// number must be indistinguishable to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Tracking info not found")]
    NotFound,
}
