//! Order identifier types
//!
//! A tracking number alone never authorizes a read: it is always paired with
//! the origin postal code, which keeps sequential tracking numbers from being
//! enumerated.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CredentialError;

const TRACKING_NUMBER_MAX_LEN: usize = 40;
const POSTAL_CODE_MIN_LEN: usize = 3;
const POSTAL_CODE_MAX_LEN: usize = 10;

/// Public tracking token identifying one order's tracking feed
///
/// Normalized to upper case. Format: 1-40 chars of `[A-Z0-9-]`,
/// e.g. "RTN-ABC12345".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackingNumber(String);

impl TrackingNumber {
    /// Parse and normalize a tracking number
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let normalized = raw.trim().to_ascii_uppercase();
        let valid_chars = normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');

        if normalized.is_empty() || normalized.len() > TRACKING_NUMBER_MAX_LEN || !valid_chars {
            return Err(CredentialError::InvalidTrackingNumber(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Get the tracking number string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TrackingNumber {
    type Error = CredentialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TrackingNumber> for String {
    fn from(value: TrackingNumber) -> Self {
        value.0
    }
}

/// Origin postal code, the low-entropy secondary credential
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PostalCode(String);

impl PostalCode {
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let trimmed = raw.trim();
        let valid_chars = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-');

        if trimmed.len() < POSTAL_CODE_MIN_LEN || trimmed.len() > POSTAL_CODE_MAX_LEN || !valid_chars {
            return Err(CredentialError::InvalidPostalCode(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Postal codes compare case-insensitively ("sw1a 1aa" == "SW1A 1AA")
impl PartialEq for PostalCode {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PostalCode {}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PostalCode {
    type Error = CredentialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PostalCode> for String {
    fn from(value: PostalCode) -> Self {
        value.0
    }
}

/// The credential pair required for every tracking read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCredential {
    pub tracking_number: TrackingNumber,
    #[serde(rename = "zipCode")]
    pub postal_code: PostalCode,
}

impl OrderCredential {
    /// Parse both halves of the credential from raw strings
    pub fn parse(tracking_number: &str, postal_code: &str) -> Result<Self, CredentialError> {
        Ok(Self {
            tracking_number: TrackingNumber::parse(tracking_number)?,
            postal_code: PostalCode::parse(postal_code)?,
        })
    }
}
