//! Backpressure for per-connection outbound queues
//!
//! Every push connection owns a bounded queue. Fan-out only ever uses
//! `try_send`, so a slow subscriber can never stall the publisher: when its
//! queue is full the connection is dropped and has to resubscribe, after
//! which the snapshot on subscribe brings it back in sync.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A serialized push frame queued for one connection.
///
/// The payload is encoded once per event and shared by every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Id of the event this frame carries
    pub event_id: u64,
    /// JSON text frame
    pub payload: Arc<str>,
}

impl OutboundMessage {
    pub fn new(event_id: u64, payload: impl Into<Arc<str>>) -> Self {
        Self {
            event_id,
            payload: payload.into(),
        }
    }
}

/// Action to take when a send to a connection fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureAction {
    /// Queue overflowed; the connection is lagging and must be dropped.
    DisconnectClient,
    /// Receiving side already went away.
    Gone,
}

/// Sending half of one connection's bounded queue.
#[derive(Debug, Clone)]
pub struct ConnectionQueue {
    sender: mpsc::Sender<OutboundMessage>,
}

impl ConnectionQueue {
    /// Create a queue and the receiver handed to the connection task.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue without waiting.
    pub fn enqueue(&self, message: OutboundMessage) -> Result<(), BackpressureAction> {
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(BackpressureAction::DisconnectClient),
            Err(TrySendError::Closed(_)) => Err(BackpressureAction::Gone),
        }
    }

    /// Whether the receiving connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(id: u64) -> OutboundMessage {
        OutboundMessage::new(id, format!("{{\"id\":{}}}", id))
    }

    #[test]
    fn test_queue_basic() {
        let (queue, mut rx) = ConnectionQueue::bounded(10);

        queue.enqueue(make_message(1)).unwrap();
        queue.enqueue(make_message(2)).unwrap();

        assert_eq!(rx.try_recv().unwrap().event_id, 1);
        assert_eq!(rx.try_recv().unwrap().event_id, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_queue_overflow_disconnect() {
        let (queue, _rx) = ConnectionQueue::bounded(2);

        queue.enqueue(make_message(1)).unwrap();
        queue.enqueue(make_message(2)).unwrap();

        let result = queue.enqueue(make_message(3));
        assert_eq!(result.unwrap_err(), BackpressureAction::DisconnectClient);
    }

    #[test]
    fn test_closed_receiver_reports_gone() {
        let (queue, rx) = ConnectionQueue::bounded(2);
        drop(rx);

        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(make_message(1)).unwrap_err(), BackpressureAction::Gone);
    }

    #[test]
    fn test_payload_shared_between_clones() {
        let message = make_message(7);
        let copy = message.clone();
        assert!(Arc::ptr_eq(&message.payload, &copy.payload));
    }
}
