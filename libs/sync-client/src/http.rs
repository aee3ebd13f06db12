//! HTTP snapshot transport

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracking_types::ids::OrderCredential;
use tracking_types::snapshot::Snapshot;

use crate::error::SyncError;
use crate::transport::SnapshotSource;

/// Client for `GET /tracking/{trackingNumber}?zipCode=...`.
#[derive(Debug, Clone)]
pub struct HttpSnapshotClient {
    client: Client,
    base_url: Url,
}

impl HttpSnapshotClient {
    /// `base_url` is the gateway root, e.g. `http://host:8080`.
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("invalid base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!("{base_url} cannot be a base url")));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    fn tracking_url(&self, credential: &OrderCredential) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SyncError::Config("base url cannot carry a path".to_string()))?;
            segments
                .pop_if_empty()
                .push("tracking")
                .push(credential.tracking_number.as_str());
        }
        url.query_pairs_mut()
            .append_pair("zipCode", credential.postal_code.as_str());
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, SyncError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| SyncError::Protocol(e.to_string())),
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Err(SyncError::Authorization),
            status => Err(SyncError::Transport(format!("unexpected status {status}"))),
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotClient {
    async fn fetch_snapshot(&self, credential: &OrderCredential) -> Result<Snapshot, SyncError> {
        let url = self.tracking_url(credential)?;
        self.get_json(url).await
    }
}
