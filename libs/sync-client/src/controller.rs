//! Client sync controller
//!
//! One controller owns the live view of one order. It runs a single control
//! loop that receives typed events (connected, connect failed, push message,
//! dropped, poll completed, timer fired, refresh) and drives the connection
//! state machine:
//!
//! - Start: an initial poll and the first push connect run concurrently.
//! - Subscribed: polling backs off to the healthy period.
//! - Failed connect: fixed-interval retry up to `max_reconnect_attempts`,
//!   then polling only until [`SyncHandle::refresh`].
//! - Dropped subscription: reconnect after the retry interval; a drop is not
//!   a failed connect.
//! - Gap or lost event: poll now. If a poll is already in flight, another
//!   one follows it, so the snapshot is fetched after the gap was seen.
//! - Terminal order status or authorization failure: nothing else is
//!   scheduled.
//!
//! Every spawned task lives in the loop's `JoinSet` and carries a child
//! cancellation token, so teardown aborts in-flight connects and polls and
//! closes the socket. Results from superseded connection attempts are
//! recognised by their epoch and ignored.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracking_types::ids::{OrderCredential, TrackingNumber};
use tracking_types::message::{PushErrorCode, PushMessage};
use tracking_types::snapshot::Snapshot;

use crate::backoff::{ReconnectPolicy, RetryDecision};
use crate::config::SyncConfig;
use crate::error::{SyncError, ViewError};
use crate::merge::{ClientSyncState, Incoming, MergeOutcome, MergeStats, StaleReason};
use crate::state::ConnectionState;
use crate::transport::{PushConnector, SnapshotSource};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// What the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingView {
    pub connection: ConnectionState,
    pub snapshot: Snapshot,
    /// Wall-clock time of the last merge that changed the snapshot.
    pub last_merged_at: Option<DateTime<Utc>>,
    pub stats: MergeStats,
    pub error: Option<ViewError>,
}

impl TrackingView {
    pub fn is_live(&self) -> bool {
        self.connection.is_live()
    }
}

enum Command {
    Refresh,
}

enum ControlEvent {
    Connected { epoch: u64, snapshot: Snapshot },
    ConnectFailed { epoch: u64, error: SyncError },
    Push { epoch: u64, message: PushMessage },
    Dropped { epoch: u64, error: Option<SyncError> },
    PollCompleted { result: Result<Snapshot, SyncError> },
}

/// Owner handle for a running controller.
///
/// Dropping the handle tears the controller down; [`SyncHandle::close`]
/// does the same and waits for it to finish.
pub struct SyncHandle {
    tracking_number: TrackingNumber,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    view_rx: watch::Receiver<TrackingView>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn tracking_number(&self) -> &TrackingNumber {
        &self.tracking_number
    }

    /// Manual refresh: poll now, reset the reconnect budget and reconnect if
    /// push is not live.
    pub fn refresh(&self) {
        let _ = self.commands.send(Command::Refresh);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn view(&self) -> TrackingView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<TrackingView> {
        self.view_rx.clone()
    }

    /// Tear down and wait until every timer, request and socket is released.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a controller for one order. Must be called inside a tokio runtime.
pub fn spawn(
    credential: OrderCredential,
    config: SyncConfig,
    connector: Arc<dyn PushConnector>,
    source: Arc<dyn SnapshotSource>,
) -> Result<SyncHandle, SyncError> {
    config.validate()?;

    let tracking_number = credential.tracking_number.clone();
    let merge = ClientSyncState::new(tracking_number.clone(), config.pending_limit);
    let initial_view = TrackingView {
        connection: ConnectionState::Disconnected,
        snapshot: merge.snapshot().clone(),
        last_merged_at: None,
        stats: merge.stats(),
        error: None,
    };

    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (view_tx, view_rx) = watch::channel(initial_view);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let controller = Controller {
        policy: ReconnectPolicy::new(config.retry_interval, config.max_reconnect_attempts),
        credential,
        config,
        connector,
        source,
        merge,
        state: ConnectionState::Disconnected,
        epoch: 0,
        session: None,
        poll_in_flight: false,
        repoll: false,
        next_poll: None,
        next_reconnect: None,
        last_merged_at: None,
        error: None,
        tasks: JoinSet::new(),
        event_tx,
        event_rx,
        command_rx,
        cancel: cancel.clone(),
        state_tx,
        view_tx,
    };
    let task = tokio::spawn(controller.run());

    Ok(SyncHandle {
        tracking_number,
        commands: command_tx,
        state_rx,
        view_rx,
        cancel,
        task: Some(task),
    })
}

struct Controller {
    credential: OrderCredential,
    config: SyncConfig,
    connector: Arc<dyn PushConnector>,
    source: Arc<dyn SnapshotSource>,
    merge: ClientSyncState,
    policy: ReconnectPolicy,
    state: ConnectionState,
    /// Incremented per connect attempt; tags every session event.
    epoch: u64,
    session: Option<CancellationToken>,
    poll_in_flight: bool,
    /// Poll again as soon as the in-flight one completes.
    repoll: bool,
    next_poll: Option<Instant>,
    next_reconnect: Option<Instant>,
    last_merged_at: Option<DateTime<Utc>>,
    error: Option<ViewError>,
    tasks: JoinSet<()>,
    event_tx: mpsc::UnboundedSender<ControlEvent>,
    event_rx: mpsc::UnboundedReceiver<ControlEvent>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    view_tx: watch::Sender<TrackingView>,
}

impl Controller {
    async fn run(mut self) {
        info!(tracking_number = %self.credential.tracking_number, "Sync controller started");

        self.start_poll();
        self.start_connect();

        while !self.state.is_closed() {
            let poll_at = self.next_poll;
            let reconnect_at = self.next_reconnect;

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(command) = self.command_rx.recv() => match command {
                    Command::Refresh => self.on_refresh(),
                },

                Some(event) = self.event_rx.recv() => self.on_event(event),

                _ = tokio::time::sleep_until(poll_at.unwrap_or_else(Instant::now)), if poll_at.is_some() => {
                    self.next_poll = None;
                    self.start_poll();
                }

                _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.next_reconnect = None;
                    self.start_connect();
                }

                // Reap finished tasks
                Some(_) = self.tasks.join_next(), if !self.tasks.is_empty() => {}
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        // Sessions close their sockets on cancel; abort whatever lingers
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            self.tasks.shutdown().await;
        }
        self.session = None;
        self.next_poll = None;
        self.next_reconnect = None;
        self.set_state(ConnectionState::Closed);
        info!(tracking_number = %self.credential.tracking_number, "Sync controller closed");
    }

    // ── Event handling ──────────────────────────────────────────────

    fn on_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Connected { epoch, snapshot } if epoch == self.epoch => {
                self.policy.record_success();
                info!(tracking_number = %self.credential.tracking_number, "Push subscription live");
                self.set_state(ConnectionState::Subscribed);
                self.apply(Incoming::Snapshot(snapshot));
                self.reschedule_poll();
            }
            ControlEvent::ConnectFailed { epoch, error } if epoch == self.epoch => {
                self.session = None;
                if error.is_authorization() {
                    self.fail_authorization();
                } else {
                    self.on_connect_failed(error);
                }
            }
            ControlEvent::Push { epoch, message } if epoch == self.epoch => {
                self.on_push(message);
            }
            ControlEvent::Dropped { epoch, error } if epoch == self.epoch => {
                self.session = None;
                match error {
                    Some(error) if error.is_authorization() => self.fail_authorization(),
                    error => self.on_dropped(error),
                }
            }
            ControlEvent::PollCompleted { result } => {
                self.poll_in_flight = false;
                let repoll = std::mem::take(&mut self.repoll);
                match result {
                    Ok(snapshot) => self.apply(Incoming::Snapshot(snapshot)),
                    Err(error) if error.is_authorization() => {
                        self.fail_authorization();
                        return;
                    }
                    Err(error) => {
                        warn!(
                            tracking_number = %self.credential.tracking_number,
                            error = %error,
                            "Snapshot poll failed"
                        );
                    }
                }
                if repoll {
                    self.start_poll();
                }
                self.reschedule_poll();
            }
            _ => debug!("Ignoring event from superseded connection attempt"),
        }
    }

    fn on_push(&mut self, message: PushMessage) {
        match message {
            PushMessage::Snapshot { data, .. } => self.apply(Incoming::Snapshot(data)),
            PushMessage::StatusUpdate { data, .. } | PushMessage::LocationUpdate { data, .. } => {
                self.apply(Incoming::Event(data))
            }
            PushMessage::Error {
                code: PushErrorCode::Unauthorized,
                ..
            } => self.fail_authorization(),
            PushMessage::Error { code, message } => {
                warn!(
                    tracking_number = %self.credential.tracking_number,
                    ?code,
                    message = %message,
                    "Push channel reported an error"
                );
            }
        }
    }

    fn on_connect_failed(&mut self, error: SyncError) {
        let decision = self.policy.record_failure();
        let failed_attempts = self.policy.failures();

        match decision {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    tracking_number = %self.credential.tracking_number,
                    error = %error,
                    failed_attempts,
                    delay_secs = delay.as_secs(),
                    "Push connect failed, retrying"
                );
                self.next_reconnect = Some(Instant::now() + delay);
            }
            RetryDecision::GiveUp => {
                warn!(
                    tracking_number = %self.credential.tracking_number,
                    error = %error,
                    failed_attempts,
                    "Reconnect attempts exhausted; polling only"
                );
                self.next_reconnect = None;
            }
        }

        self.set_state(ConnectionState::Degraded {
            failed_attempts,
            retry_scheduled: self.next_reconnect.is_some(),
        });
        self.reschedule_poll();
    }

    fn on_dropped(&mut self, error: Option<SyncError>) {
        if self.merge.snapshot().is_terminal() {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        warn!(
            tracking_number = %self.credential.tracking_number,
            error = ?error,
            "Push connection dropped"
        );
        self.next_reconnect = Some(Instant::now() + self.policy.interval());
        self.set_state(ConnectionState::Degraded {
            failed_attempts: self.policy.failures(),
            retry_scheduled: true,
        });
        self.reschedule_poll();
    }

    fn on_refresh(&mut self) {
        info!(tracking_number = %self.credential.tracking_number, "Manual refresh");
        self.policy.reset();
        self.start_poll();

        let connecting = matches!(self.state, ConnectionState::Connecting { .. });
        if !self.state.is_live() && !connecting {
            self.next_reconnect = None;
            self.start_connect();
        }
    }

    fn fail_authorization(&mut self) {
        warn!(
            tracking_number = %self.credential.tracking_number,
            "Tracking info not found; stopping sync"
        );
        self.error = Some(ViewError::NotFound);
        self.set_state(ConnectionState::Closed);
    }

    // ── Merging ─────────────────────────────────────────────────────

    fn apply(&mut self, incoming: Incoming) {
        match self.merge.merge(incoming) {
            MergeOutcome::Applied { .. } => {
                self.last_merged_at = Some(Utc::now());
            }
            MergeOutcome::Buffered { .. }
            | MergeOutcome::StaleDataIgnored {
                reason: StaleReason::PendingFull { .. },
            } => self.request_resync(),
            MergeOutcome::StaleDataIgnored { .. } => {}
        }

        if self.merge.snapshot().is_terminal() {
            self.on_terminal();
        }
        self.publish_view();
    }

    fn on_terminal(&mut self) {
        self.next_poll = None;
        self.next_reconnect = None;
        if let Some(token) = self.session.take() {
            token.cancel();
            // Late results from the cancelled session are ignored
            self.epoch += 1;
        }
        if self.state != ConnectionState::Disconnected && !self.state.is_closed() {
            info!(
                tracking_number = %self.credential.tracking_number,
                status = self.merge.snapshot().status.as_str(),
                "Order reached terminal status; sync stopped"
            );
            self.set_state(ConnectionState::Disconnected);
        }
    }

    // ── Scheduling ──────────────────────────────────────────────────

    fn reschedule_poll(&mut self) {
        if self.poll_in_flight || self.merge.snapshot().is_terminal() || self.state.is_closed() {
            return;
        }
        let period = if self.state.is_live() {
            self.config.healthy_poll_interval
        } else {
            self.config.degraded_poll_interval
        };
        self.next_poll = Some(Instant::now() + period);
    }

    /// Resynchronize through the snapshot API with a poll that starts after
    /// this call.
    fn request_resync(&mut self) {
        if self.poll_in_flight {
            // That response may predate the event we just saw
            self.repoll = true;
        } else {
            self.start_poll();
        }
    }

    fn start_poll(&mut self) {
        if self.poll_in_flight || self.merge.snapshot().is_terminal() {
            return;
        }
        self.poll_in_flight = true;
        self.next_poll = None;

        let source = Arc::clone(&self.source);
        let credential = self.credential.clone();
        let timeout = self.config.poll_timeout;
        let token = self.cancel.child_token();
        let tx = self.event_tx.clone();

        self.tasks.spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = tokio::time::timeout(timeout, source.fetch_snapshot(&credential)) => {
                    result.unwrap_or(Err(SyncError::Timeout(timeout)))
                }
            };
            let _ = tx.send(ControlEvent::PollCompleted { result });
        });
    }

    fn start_connect(&mut self) {
        if self.merge.snapshot().is_terminal() {
            return;
        }
        if let Some(previous) = self.session.take() {
            previous.cancel();
        }

        self.epoch += 1;
        let epoch = self.epoch;
        self.set_state(ConnectionState::Connecting {
            attempt: self.policy.failures() + 1,
        });

        let token = self.cancel.child_token();
        self.session = Some(token.clone());

        let connector = Arc::clone(&self.connector);
        let credential = self.credential.clone();
        let timeout = self.config.connect_timeout;
        let tx = self.event_tx.clone();

        self.tasks
            .spawn(run_session(epoch, connector, credential, timeout, token, tx));
    }

    // ── Observability ───────────────────────────────────────────────

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(
            tracking_number = %self.credential.tracking_number,
            from = %self.state,
            to = %state,
            "Connection state transition"
        );
        self.state = state;
        self.state_tx.send_replace(state);
        self.publish_view();
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(TrackingView {
            connection: self.state,
            snapshot: self.merge.snapshot().clone(),
            last_merged_at: self.last_merged_at,
            stats: self.merge.stats(),
            error: self.error,
        });
    }
}

/// One connection attempt and, if it succeeds, the session's read loop.
async fn run_session(
    epoch: u64,
    connector: Arc<dyn PushConnector>,
    credential: OrderCredential,
    timeout: Duration,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<ControlEvent>,
) {
    let connected = tokio::select! {
        _ = token.cancelled() => return,
        result = tokio::time::timeout(timeout, connector.connect(&credential)) => result,
    };

    let mut stream = match connected {
        Ok(Ok((stream, snapshot))) => {
            let _ = tx.send(ControlEvent::Connected { epoch, snapshot });
            stream
        }
        Ok(Err(error)) => {
            let _ = tx.send(ControlEvent::ConnectFailed { epoch, error });
            return;
        }
        Err(_) => {
            let _ = tx.send(ControlEvent::ConnectFailed {
                epoch,
                error: SyncError::Timeout(timeout),
            });
            return;
        }
    };

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = stream.next_message() => match next {
                Ok(Some(message)) => {
                    if tx.send(ControlEvent::Push { epoch, message }).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(ControlEvent::Dropped { epoch, error: None });
                    return;
                }
                Err(error) => {
                    let _ = tx.send(ControlEvent::Dropped { epoch, error: Some(error) });
                    return;
                }
            },
        }
    }

    stream.close().await;
}
