//! Sequence numbering and retransmission bookkeeping for the datagram transport.
//!
//! Commands other than `status` share one counter and are retransmitted until
//! acked, superseded by a newer command, or out of retries. Probes use their
//! own counter and are never retransmitted.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

/// Counters owned by one datagram transport. All of them only grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceState {
    largest_sent: u64,
    largest_sent_probe: u64,
    largest_acked: u64,
}

impl SequenceState {
    /// Assign the next command sequence number
    pub fn next_command(&mut self) -> u64 {
        self.largest_sent += 1;
        self.largest_sent
    }

    /// Assign the next probe sequence number
    pub fn next_probe(&mut self) -> u64 {
        self.largest_sent_probe += 1;
        self.largest_sent_probe
    }

    /// Fold an inbound ack into the running maximum.
    /// Returns false for stale or duplicate acks.
    pub fn record_ack(&mut self, seq: u64) -> bool {
        if seq > self.largest_acked {
            self.largest_acked = seq;
            true
        } else {
            false
        }
    }

    pub fn is_acked(&self, seq: u64) -> bool {
        seq <= self.largest_acked
    }

    /// A newer command has been sent since `seq`
    pub fn is_superseded(&self, seq: u64) -> bool {
        self.largest_sent > seq
    }

    pub fn largest_sent(&self) -> u64 {
        self.largest_sent
    }

    pub fn largest_sent_probe(&self) -> u64 {
        self.largest_sent_probe
    }

    pub fn largest_acked(&self) -> u64 {
        self.largest_acked
    }
}

/// Snapshot of a sent command awaiting its ack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRetransmission {
    pub seq: u64,
    /// Exact bytes sent, sequence prefix included
    pub payload: Vec<u8>,
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitDecision {
    Acked,
    Superseded,
    Exhausted,
    Retry,
}

impl PendingRetransmission {
    pub fn new(seq: u64, payload: Vec<u8>) -> Self {
        Self {
            seq,
            payload,
            retries: 0,
        }
    }

    /// Decide what to do when this command's check fires, against the
    /// counters as they are now.
    pub fn decide(&self, sequence: &SequenceState, max_retransmits: u32) -> RetransmitDecision {
        if sequence.is_acked(self.seq) {
            RetransmitDecision::Acked
        } else if sequence.is_superseded(self.seq) {
            RetransmitDecision::Superseded
        } else if self.retries > max_retransmits {
            RetransmitDecision::Exhausted
        } else {
            RetransmitDecision::Retry
        }
    }
}

#[derive(Debug)]
struct ScheduledCheck {
    due: Instant,
    pending: PendingRetransmission,
}

impl ScheduledCheck {
    fn key(&self) -> (Instant, u64) {
        (self.due, self.pending.seq)
    }
}

impl PartialEq for ScheduledCheck {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledCheck {}

impl PartialOrd for ScheduledCheck {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledCheck {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Retransmission checks ordered by due time.
///
/// Checks cannot be cancelled individually; acks and newer commands turn them
/// into no-ops when they fire. Only [`RetransmitSchedule::clear`] drops them.
#[derive(Debug, Default)]
pub struct RetransmitSchedule {
    checks: BinaryHeap<Reverse<ScheduledCheck>>,
}

impl RetransmitSchedule {
    pub fn schedule(&mut self, due: Instant, pending: PendingRetransmission) {
        self.checks.push(Reverse(ScheduledCheck { due, pending }));
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.checks.peek().map(|Reverse(check)| check.due)
    }

    /// Take the earliest check if it is due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<PendingRetransmission> {
        if self.next_due()? > now {
            return None;
        }
        self.checks.pop().map(|Reverse(check)| check.pending)
    }

    pub fn clear(&mut self) {
        self.checks.clear();
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
