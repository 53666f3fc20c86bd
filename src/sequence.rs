//! Sequence and ack tracker (spec §4.2)
//!
//! Tracks, per (session, direction), the outbound `nextSeq` counter and the
//! inbound delivery state: contiguous delivery, an out-of-order pending
//! buffer, duplicate suppression, and the cumulative `ack` to piggyback on
//! outbound envelopes.

use std::collections::BTreeMap;

use crate::envelope::Envelope;

/// Default number of sequence numbers a gap may span before a
/// `REPLAY_REQUEST` is emitted (spec §4.2).
pub const DEFAULT_REPLAY_GAP_WINDOW: u64 = 10;

/// Outbound sequence generator for one (session, direction).
#[derive(Debug, Default)]
pub struct OutboundSequencer {
    next_seq: u64,
}

impl OutboundSequencer {
    /// Construct a sequencer whose first emitted `seq` is 1.
    pub fn new() -> Self {
        Self { next_seq: 1 }
    }

    /// The next `seq` this sequencer would assign, without consuming it.
    pub fn peek(&self) -> u64 {
        self.next_seq
    }

    /// Assign and consume the next `seq`.
    pub fn next(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// The highest `seq` emitted so far (0 if none yet).
    pub fn last_emitted(&self) -> u64 {
        self.next_seq.saturating_sub(1)
    }
}

/// Outcome of delivering one inbound envelope to [`InboundTracker::receive`].
#[derive(Debug, PartialEq)]
pub enum DeliveryOutcome {
    /// Delivered now, plus any further envelopes from the pending buffer
    /// that became contiguous as a result, in order.
    Delivered(Vec<Envelope>),
    /// Buffered because `seq` is ahead of what's expected; gap not yet wide
    /// enough to trigger a replay request.
    Buffered,
    /// Buffered, and the persistent gap crossed the replay window: caller
    /// should emit `REPLAY_REQUEST { from_seq, to_seq }`.
    BufferedGapExceeded {
        /// Lowest missing sequence number.
        from_seq: u64,
        /// Highest sequence number currently known to be missing up to.
        to_seq: u64,
    },
    /// `seq <= lastDelivered`; dropped silently as a duplicate.
    Duplicate,
}

/// Inbound delivery tracker for one (session, direction).
#[derive(Debug)]
pub struct InboundTracker {
    expected: u64,
    last_delivered: u64,
    pending: BTreeMap<u64, Envelope>,
    gap_window: u64,
    /// `expected` at the time a `REPLAY_REQUEST` was last emitted for the
    /// gap currently open, so a persistent gap triggers exactly one request
    /// rather than one per further out-of-order arrival (spec §4.2).
    replay_requested_for: Option<u64>,
}

impl InboundTracker {
    /// Construct a tracker expecting the first inbound `seq` to be 1.
    pub fn new(gap_window: u64) -> Self {
        Self {
            expected: 1,
            last_delivered: 0,
            pending: BTreeMap::new(),
            gap_window,
            replay_requested_for: None,
        }
    }

    /// Highest inbound `seq` contiguously delivered so far; this is the
    /// value carried in the outbound `ack` field (spec §4.2).
    pub fn cumulative_ack(&self) -> u64 {
        self.last_delivered
    }

    /// Process one inbound envelope, advancing delivery state.
    pub fn receive(&mut self, envelope: Envelope) -> DeliveryOutcome {
        let seq = envelope.seq;

        if seq <= self.last_delivered {
            return DeliveryOutcome::Duplicate;
        }

        if seq == self.expected {
            let mut delivered = vec![envelope];
            self.last_delivered = seq;
            self.expected += 1;

            while let Some(next) = self.pending.remove(&self.expected) {
                self.last_delivered = self.expected;
                delivered.push(next);
                self.expected += 1;
            }

            self.replay_requested_for = None;
            return DeliveryOutcome::Delivered(delivered);
        }

        // seq > expected: out-of-order, buffer it.
        self.pending.insert(seq, envelope);

        let gap = seq.saturating_sub(self.expected);
        if gap >= self.gap_window {
            if self.replay_requested_for == Some(self.expected) {
                DeliveryOutcome::Buffered
            } else {
                self.replay_requested_for = Some(self.expected);
                DeliveryOutcome::BufferedGapExceeded {
                    from_seq: self.expected,
                    to_seq: seq.saturating_sub(1),
                }
            }
        } else {
            DeliveryOutcome::Buffered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Channel, EventType};
    use serde_json::json;

    fn env(seq: u64) -> Envelope {
        let mut e = Envelope::new("s1", Channel::System, EventType::Ping, json!({}));
        e.seq = seq;
        e
    }

    #[test]
    fn outbound_starts_at_one_and_increments() {
        let mut seqr = OutboundSequencer::new();
        assert_eq!(seqr.next(), 1);
        assert_eq!(seqr.next(), 2);
        assert_eq!(seqr.last_emitted(), 2);
    }

    #[test]
    fn inbound_delivers_contiguous_in_order() {
        let mut t = InboundTracker::new(DEFAULT_REPLAY_GAP_WINDOW);
        match t.receive(env(1)) {
            DeliveryOutcome::Delivered(v) => assert_eq!(v.len(), 1),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(t.cumulative_ack(), 1);
    }

    #[test]
    fn inbound_buffers_out_of_order_then_drains_on_gap_fill() {
        let mut t = InboundTracker::new(DEFAULT_REPLAY_GAP_WINDOW);
        match t.receive(env(1)) {
            DeliveryOutcome::Delivered(v) => assert_eq!(v.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1]),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(t.receive(env(3)), DeliveryOutcome::Buffered);
        assert_eq!(t.receive(env(4)), DeliveryOutcome::Buffered);
        assert_eq!(t.cumulative_ack(), 1);

        match t.receive(env(2)) {
            DeliveryOutcome::Delivered(v) => {
                assert_eq!(v.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3, 4]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(t.cumulative_ack(), 4);
    }

    #[test]
    fn duplicate_seq_is_dropped_silently() {
        let mut t = InboundTracker::new(DEFAULT_REPLAY_GAP_WINDOW);
        t.receive(env(1));
        assert_eq!(t.receive(env(1)), DeliveryOutcome::Duplicate);
    }

    #[test]
    fn gap_beyond_window_triggers_replay_request_once() {
        let mut t = InboundTracker::new(3);
        t.receive(env(1));
        // expected=2, seq=7 -> gap=5 >= window(3)
        match t.receive(env(7)) {
            DeliveryOutcome::BufferedGapExceeded { from_seq, to_seq } => {
                assert_eq!(from_seq, 2);
                assert_eq!(to_seq, 6);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Still the same unresolved gap: no second request.
        assert_eq!(t.receive(env(8)), DeliveryOutcome::Buffered);

        // Filling the gap resets the suppression, so a later gap requests again.
        t.receive(env(2));
        match t.receive(env(20)) {
            DeliveryOutcome::BufferedGapExceeded { from_seq, .. } => assert_eq!(from_seq, 3),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
