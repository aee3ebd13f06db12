//! Snapshot and timeline merger
//!
//! Push events and polled snapshots both flow through [`merge`]. The merged
//! state only ever moves forward:
//!
//! - An event is applied only when its id is exactly `last_applied + 1`.
//!   Events that skip ahead wait in a bounded pending buffer until the gap
//!   is filled by another event or covered by a snapshot.
//! - A snapshot replaces the state only when `(lastUpdateTimestamp,
//!   lastEventId)` is strictly newer and its id is not behind.
//! - Pickup and delivery details never change once an order exists, so they
//!   are adopted from any snapshot that carries them.
//!
//! Because the dynamic fields are always a fold of events `1..=N` with the
//! same [`Snapshot::apply`] the server uses, feeding the same inputs in any
//! order, with duplicates, converges to the same state.
//!
//! An event that does not fit in a full pending buffer is lost to this
//! state. The merger then reports [`ClientSyncState::needs_resync`] until a
//! snapshot (or the filled gap) carries it past the highest lost id.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;
use tracking_types::event::TrackingEvent;
use tracking_types::ids::TrackingNumber;
use tracking_types::snapshot::Snapshot;

/// An update entering the merger.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Full snapshot from polling or the push handshake.
    Snapshot(Snapshot),
    /// Incremental event from the push channel.
    Event(TrackingEvent),
}

/// Why an update was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// Event id already applied.
    AlreadyApplied { id: u64 },
    /// Event id already waiting in the pending buffer.
    AlreadyPending { id: u64 },
    /// Snapshot not newer than the merged state.
    OlderSnapshot { last_event_id: u64 },
    /// Update belongs to another order.
    OtherOrder,
    /// Pending buffer full and the event is the furthest ahead. The state
    /// needs a snapshot covering `id`.
    PendingFull { id: u64 },
}

/// Result of merging one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// State advanced to `last_event_id`.
    Applied { last_event_id: u64 },
    /// Event held until the gap before it is filled.
    Buffered { expected: u64, received: u64 },
    /// Deliberate no-op; not an error.
    StaleDataIgnored { reason: StaleReason },
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Applied { .. })
    }
}

/// Merge counters, kept out of state comparisons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub applied: u64,
    pub buffered: u64,
    pub stale: u64,
}

/// Client-owned merged view of one order.
#[derive(Debug, Clone)]
pub struct ClientSyncState {
    snapshot: Snapshot,
    pending: BTreeMap<u64, TrackingEvent>,
    pending_limit: usize,
    /// Highest event id dropped from a full pending buffer.
    resync_through: Option<u64>,
    stats: MergeStats,
}

impl ClientSyncState {
    pub fn new(tracking_number: TrackingNumber, pending_limit: usize) -> Self {
        Self {
            snapshot: Snapshot::blank(tracking_number),
            pending: BTreeMap::new(),
            pending_limit: pending_limit.max(1),
            resync_through: None,
            stats: MergeStats::default(),
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn last_applied_id(&self) -> u64 {
        self.snapshot.last_event_id
    }

    /// Ids waiting for a gap to fill, ascending.
    pub fn pending_ids(&self) -> Vec<u64> {
        self.pending.keys().copied().collect()
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Whether an event was dropped that only a snapshot can restore.
    pub fn needs_resync(&self) -> bool {
        self.resync_through.is_some()
    }

    pub fn merge(&mut self, incoming: Incoming) -> MergeOutcome {
        let outcome = match incoming {
            Incoming::Snapshot(snapshot) => self.merge_snapshot(snapshot),
            Incoming::Event(event) => self.merge_event(event),
        };

        match outcome {
            MergeOutcome::Applied { .. } => self.stats.applied += 1,
            MergeOutcome::Buffered { expected, received } => {
                self.stats.buffered += 1;
                debug!(
                    tracking_number = %self.snapshot.tracking_number,
                    expected,
                    received,
                    "Event buffered behind gap"
                );
            }
            MergeOutcome::StaleDataIgnored { reason } => {
                self.stats.stale += 1;
                debug!(
                    tracking_number = %self.snapshot.tracking_number,
                    ?reason,
                    "Stale data ignored"
                );
            }
        }

        if self
            .resync_through
            .is_some_and(|through| self.snapshot.last_event_id >= through)
        {
            self.resync_through = None;
        }
        outcome
    }

    fn mark_lost(&mut self, id: u64) {
        self.resync_through = Some(self.resync_through.map_or(id, |through| through.max(id)));
    }

    fn merge_event(&mut self, event: TrackingEvent) -> MergeOutcome {
        let last = self.snapshot.last_event_id;

        if event.id <= last {
            return stale(StaleReason::AlreadyApplied { id: event.id });
        }

        if event.id == last + 1 {
            self.snapshot.apply(&event);
            self.drain_pending();
            return MergeOutcome::Applied {
                last_event_id: self.snapshot.last_event_id,
            };
        }

        if self.pending.contains_key(&event.id) {
            return stale(StaleReason::AlreadyPending { id: event.id });
        }

        if self.pending.len() >= self.pending_limit {
            // Keep the ids closest to the gap
            match self.pending.keys().next_back().copied() {
                Some(furthest) if furthest > event.id => {
                    self.pending.remove(&furthest);
                    self.mark_lost(furthest);
                }
                _ => {
                    self.mark_lost(event.id);
                    return stale(StaleReason::PendingFull { id: event.id });
                }
            }
        }

        let received = event.id;
        self.pending.insert(received, event);
        MergeOutcome::Buffered {
            expected: last + 1,
            received,
        }
    }

    fn merge_snapshot(&mut self, incoming: Snapshot) -> MergeOutcome {
        if incoming.tracking_number != self.snapshot.tracking_number {
            return stale(StaleReason::OtherOrder);
        }

        // Immutable order facts
        if self.snapshot.pickup.is_none() {
            self.snapshot.pickup = incoming.pickup.clone();
        }
        if self.snapshot.delivery.is_none() {
            self.snapshot.delivery = incoming.delivery.clone();
        }

        let newer = incoming.version() > self.snapshot.version();
        if !newer || incoming.last_event_id < self.snapshot.last_event_id {
            return stale(StaleReason::OlderSnapshot {
                last_event_id: incoming.last_event_id,
            });
        }

        let pickup = self.snapshot.pickup.take();
        let delivery = self.snapshot.delivery.take();
        self.snapshot = incoming;
        self.snapshot.pickup = self.snapshot.pickup.take().or(pickup);
        self.snapshot.delivery = self.snapshot.delivery.take().or(delivery);

        let covered = self.snapshot.last_event_id;
        self.pending.retain(|&id, _| id > covered);
        self.drain_pending();

        MergeOutcome::Applied {
            last_event_id: self.snapshot.last_event_id,
        }
    }

    fn drain_pending(&mut self) {
        while let Some(event) = self.pending.remove(&(self.snapshot.last_event_id + 1)) {
            self.snapshot.apply(&event);
        }
    }
}

fn stale(reason: StaleReason) -> MergeOutcome {
    MergeOutcome::StaleDataIgnored { reason }
}

/// Merge one update into `state`; see [`ClientSyncState::merge`].
pub fn merge(state: &mut ClientSyncState, incoming: Incoming) -> MergeOutcome {
    state.merge(incoming)
}
