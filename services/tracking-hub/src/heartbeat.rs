//! Heartbeat liveness tracking for push connections
//!
//! The connection task calls [`Liveness::on_ping_due`] on every heartbeat
//! tick and [`Liveness::on_pong`] whenever the peer shows signs of life. A
//! peer that lets `max_missed` pings go unanswered is declared dead, even if
//! the transport never delivered a close.

/// Outcome of a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Send a ping and keep going.
    SendPing,
    /// Too many unanswered pings; drop the connection.
    Dead,
}

#[derive(Debug, Clone)]
pub struct Liveness {
    outstanding: u32,
    max_missed: u32,
}

impl Liveness {
    pub fn new(max_missed: u32) -> Self {
        Self {
            outstanding: 0,
            max_missed: max_missed.max(1),
        }
    }

    pub fn on_ping_due(&mut self) -> Verdict {
        if self.outstanding >= self.max_missed {
            return Verdict::Dead;
        }
        self.outstanding += 1;
        Verdict::SendPing
    }

    /// Any inbound frame counts as a pong.
    pub fn on_pong(&mut self) {
        self.outstanding = 0;
    }

    /// Pings sent since the last sign of life.
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }
}
