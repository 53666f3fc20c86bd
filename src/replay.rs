//! Replay window (spec §4.3)
//!
//! A bounded time+size buffer of outbound envelopes keyed by `seq`, used to
//! satisfy `REPLAY_REQUEST` after a detected gap and to replay missed
//! outbound traffic on resume.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::envelope::Envelope;
use crate::error::{HaipError, Result};

/// One stored outbound envelope plus its optional binary payload and
/// insertion timestamp (spec §3 "Replay entry").
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    /// The envelope as it was originally transmitted.
    pub envelope: Envelope,
    /// The binary payload bound to this envelope, if any (spec §4.1 pairing).
    pub binary: Option<Bytes>,
    inserted_at: Instant,
}

/// Bounded store of outbound envelopes for one session/direction.
pub struct ReplayWindow {
    entries: BTreeMap<u64, ReplayEntry>,
    max_count: usize,
    max_age: Duration,
    peer_ack: u64,
    /// Highest `seq` ever evicted; once a sequence falls behind this, it is
    /// gone for good even though the window itself may now be empty.
    last_evicted_seq: u64,
}

impl ReplayWindow {
    /// Construct a window retaining at most `max_count` entries, each kept
    /// for at least `max_age` regardless of ack progress (spec §4.3).
    pub fn new(max_count: usize, max_age: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_count,
            max_age,
            peer_ack: 0,
            last_evicted_seq: 0,
        }
    }

    /// Record a freshly transmitted outbound envelope.
    pub fn record(&mut self, envelope: Envelope, binary: Option<Bytes>) {
        let seq = envelope.seq;
        self.entries.insert(
            seq,
            ReplayEntry {
                envelope,
                binary,
                inserted_at: Instant::now(),
            },
        );
        self.evict();
    }

    /// Update the peer's last acked sequence, used to decide evictability.
    pub fn note_peer_ack(&mut self, ack: u64) {
        if ack > self.peer_ack {
            self.peer_ack = ack;
        }
        self.evict();
    }

    /// The oldest `seq` still servable from the window: the lowest retained
    /// entry, or one past the highest ever evicted if the window has since
    /// drained, or 0 if nothing has ever passed through it.
    pub fn floor(&self) -> u64 {
        match self.entries.keys().next() {
            Some(&seq) => seq,
            None if self.last_evicted_seq > 0 => self.last_evicted_seq + 1,
            None => 0,
        }
    }

    /// Evict entries that are both acked by the peer and past their max age
    /// or over the count cap (spec §4.3), oldest first.
    fn evict(&mut self) {
        loop {
            if self.entries.len() <= self.max_count {
                break;
            }
            let Some((&oldest_seq, entry)) = self.entries.iter().next() else {
                break;
            };
            if oldest_seq <= self.peer_ack {
                self.entries.remove(&oldest_seq);
                self.last_evicted_seq = self.last_evicted_seq.max(oldest_seq);
                continue;
            }
            let _ = entry;
            break;
        }

        let max_age = self.max_age;
        let peer_ack = self.peer_ack;
        let mut evicted = Vec::new();
        self.entries.retain(|&seq, entry| {
            let evict = seq <= peer_ack && entry.inserted_at.elapsed() >= max_age;
            if evict {
                evicted.push(seq);
            }
            !evict
        });
        if let Some(&highest) = evicted.iter().max() {
            self.last_evicted_seq = self.last_evicted_seq.max(highest);
        }
    }

    /// Serve a `REPLAY_REQUEST { from_seq, to_seq }`.
    ///
    /// Returns the stored entries with `from_seq <= seq <= to_seq`, in
    /// order, re-emitting exactly the original envelopes and any bound
    /// binary payload. `to_seq` of `None` means "up to the current last
    /// outbound seq" (spec §9 Open Question resolution).
    pub fn replay(&self, from_seq: u64, to_seq: Option<u64>, last_outbound_seq: u64) -> Result<Vec<ReplayEntry>> {
        if from_seq < self.floor() {
            return Err(HaipError::ReplayTooOld {
                from_seq,
                floor: self.floor(),
            });
        }
        let upper = to_seq.unwrap_or(last_outbound_seq);
        Ok(self
            .entries
            .range(from_seq..=upper)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
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
    fn replay_returns_requested_range_unchanged() {
        let mut w = ReplayWindow::new(1000, Duration::from_secs(60));
        for seq in 1..=10 {
            w.record(env(seq), None);
        }
        let entries = w.replay(5, Some(6), 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].envelope.seq, 5);
        assert_eq!(entries[1].envelope.seq, 6);
    }

    #[test]
    fn replay_without_to_seq_goes_to_last_outbound() {
        let mut w = ReplayWindow::new(1000, Duration::from_secs(60));
        for seq in 1..=5 {
            w.record(env(seq), None);
        }
        let entries = w.replay(3, None, 5).unwrap();
        assert_eq!(entries.iter().map(|e| e.envelope.seq).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn replay_below_floor_is_replay_too_old() {
        let mut w = ReplayWindow::new(2, Duration::from_secs(0));
        for seq in 1..=5 {
            w.record(env(seq), None);
            w.note_peer_ack(seq);
        }
        // max_count=2, max_age=0 -> aggressively evicted once acked.
        let err = w.replay(1, Some(2), 5).unwrap_err();
        assert_eq!(err.code(), "REPLAY_TOO_OLD");
    }

    #[test]
    fn unacked_entries_are_retained_past_max_count_pressure() {
        let mut w = ReplayWindow::new(2, Duration::from_secs(60));
        for seq in 1..=5 {
            w.record(env(seq), None);
        }
        // Nothing acked yet, so nothing evictable regardless of count cap.
        assert_eq!(w.len(), 5);
    }
}
