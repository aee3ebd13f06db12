//! One active controller per displayed order

use std::sync::Arc;

use tracing::info;
use tracking_types::ids::OrderCredential;

use crate::config::SyncConfig;
use crate::controller::{self, SyncHandle};
use crate::error::SyncError;
use crate::transport::{PushConnector, SnapshotSource};

/// Owns the controller for whatever order the UI currently shows.
///
/// Tracking a new order tears the previous controller down first, so a
/// session never holds two live subscriptions. Independent sessions (for
/// example two browser tabs) keep independent backoff state.
pub struct TrackingSession {
    config: SyncConfig,
    connector: Arc<dyn PushConnector>,
    source: Arc<dyn SnapshotSource>,
    current: Option<SyncHandle>,
}

impl TrackingSession {
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn PushConnector>,
        source: Arc<dyn SnapshotSource>,
    ) -> Self {
        Self {
            config,
            connector,
            source,
            current: None,
        }
    }

    pub async fn track(&mut self, credential: OrderCredential) -> Result<&SyncHandle, SyncError> {
        self.stop().await;

        info!(tracking_number = %credential.tracking_number, "Tracking order");
        let handle = controller::spawn(
            credential,
            self.config.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.source),
        )?;
        Ok(self.current.insert(handle))
    }

    pub fn current(&self) -> Option<&SyncHandle> {
        self.current.as_ref()
    }

    /// Tear down the active controller, if any, and wait for it.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;
    use crate::transport::PushStream;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tracking_types::snapshot::{OrderRecord, Snapshot, StopInfo};

    struct Refusing {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl PushConnector for Refusing {
        async fn connect(
            &self,
            _credential: &OrderCredential,
        ) -> Result<(Box<dyn PushStream>, Snapshot), SyncError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Transport("connection refused".to_string()))
        }
    }

    struct Static;

    #[async_trait]
    impl SnapshotSource for Static {
        async fn fetch_snapshot(&self, credential: &OrderCredential) -> Result<Snapshot, SyncError> {
            let record = OrderRecord {
                credential: credential.clone(),
                pickup: StopInfo::new("1 Market St"),
                delivery: StopInfo::new("500 Olive St"),
                created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            };
            Ok(Snapshot::initial(&record))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_orders_closes_previous_controller() {
        let connector = Arc::new(Refusing {
            attempts: AtomicU32::new(0),
        });
        let mut session = TrackingSession::new(SyncConfig::default(), connector.clone(), Arc::new(Static));

        let first = session
            .track(OrderCredential::parse("RTN-ABC12345", "63101").unwrap())
            .await
            .unwrap();
        let mut first_state = first.subscribe_state();

        let second = session
            .track(OrderCredential::parse("RTN-XYZ00001", "10001").unwrap())
            .await
            .unwrap();
        assert_eq!(second.tracking_number().as_str(), "RTN-XYZ00001");
        assert_eq!(*first_state.borrow_and_update(), ConnectionState::Closed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        // Only the second controller keeps retrying: 1 + 3
        assert!(connector.attempts.load(Ordering::SeqCst) <= 4);

        session.stop().await;
        assert!(session.current().is_none());
    }
}
