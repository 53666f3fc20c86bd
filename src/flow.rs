//! Flow controller (spec §4.4)
//!
//! Per (session, channel, direction) credit accounting: non-negative
//! `messages`/`bytes` pools, pause/resume, and grant requests when a pool
//! crosses its low-water threshold.

use std::collections::HashMap;

use bytes::Bytes;

use crate::envelope::{self, Channel, Envelope};
use crate::error::{HaipError, Result};

/// Per-channel initial/maximum credit defaults (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct ChannelCredit {
    /// Initial and default maximum message credit.
    pub messages: u64,
    /// Initial and default maximum byte credit.
    pub bytes: u64,
}

impl ChannelCredit {
    /// The spec-mandated default for a given channel.
    pub fn default_for(channel: Channel) -> Self {
        match channel {
            Channel::User | Channel::Agent => ChannelCredit {
                messages: 32,
                bytes: 262_144,
            },
            Channel::System => ChannelCredit {
                messages: 50,
                bytes: 524_288,
            },
            Channel::AudioIn | Channel::AudioOut => ChannelCredit {
                messages: 1_000,
                bytes: 10_485_760,
            },
        }
    }
}

/// A single (session, channel, direction) credit pool.
#[derive(Debug, Clone)]
pub struct CreditPool {
    messages: u64,
    bytes: u64,
    max_messages: u64,
    max_bytes: u64,
    low_water_threshold: f64,
    paused: bool,
}

impl CreditPool {
    /// Construct a pool at its initial credit, with `max_*` as the cap that
    /// `FLOW_UPDATE` grants saturate at.
    pub fn new(initial: ChannelCredit, max: ChannelCredit, low_water_threshold: f64) -> Self {
        Self {
            messages: initial.messages,
            bytes: initial.bytes,
            max_messages: max.messages,
            max_bytes: max.bytes,
            low_water_threshold,
            paused: false,
        }
    }

    /// Current message credit.
    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Current byte credit.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Whether the channel is paused in this direction.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether an envelope of `envelope_size + bin_len` bytes may be sent
    /// right now (spec §4.4 sender rule).
    pub fn can_send(&self, envelope_size: u64) -> bool {
        !self.paused && self.messages >= 1 && self.bytes >= envelope_size
    }

    /// Deduct credit for a transmitted envelope.
    ///
    /// # Errors
    /// Returns [`HaipError::FlowControlViolation`] if the deduction would
    /// drive either pool negative (callers must check [`can_send`] first;
    /// this is a last-line invariant guard, spec §8 invariant 3).
    pub fn deduct(&mut self, envelope_size: u64, channel: Channel) -> Result<()> {
        if self.messages < 1 || self.bytes < envelope_size {
            return Err(HaipError::FlowControlViolation {
                channel: channel.to_string(),
                reason: "insufficient credit".to_string(),
            });
        }
        self.messages -= 1;
        self.bytes -= envelope_size;
        Ok(())
    }

    /// Whether this pool has fallen below its low-water threshold and a
    /// grant request should be emitted to the peer.
    pub fn below_low_water(&self) -> bool {
        (self.messages as f64) < (self.max_messages as f64) * self.low_water_threshold
            || (self.bytes as f64) < (self.max_bytes as f64) * self.low_water_threshold
    }

    /// How much credit would need to be granted to refill this pool to its
    /// configured maximum, used to size an outbound `FLOW_UPDATE` request.
    pub fn needed_to_fill(&self) -> (u64, u64) {
        (
            self.max_messages.saturating_sub(self.messages),
            self.max_bytes.saturating_sub(self.bytes),
        )
    }

    /// Apply a `FLOW_UPDATE` grant, capped at the configured maximum.
    pub fn grant(&mut self, add_messages: u64, add_bytes: u64) {
        self.messages = (self.messages + add_messages).min(self.max_messages);
        self.bytes = (self.bytes + add_bytes).min(self.max_bytes);
    }

    /// Set the pause flag (`PAUSE_CHANNEL`/`RESUME_CHANNEL`).
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

/// Per-session flow controller: one [`CreditPool`] per channel, for a single
/// direction (the session owns one instance per direction).
pub struct FlowController {
    pools: HashMap<Channel, CreditPool>,
    pending: HashMap<Channel, Vec<PendingSend>>,
    max_pending_per_channel: usize,
    /// Channels a grant request has already been emitted for, suppressing
    /// further requests until a grant (or pause toggle) clears the entry.
    requested: std::collections::HashSet<Channel>,
}

/// A deferred send, buffered while its channel is paused or out of credit,
/// holding the original envelope (its `seq`/`ack` not yet assigned) so it can
/// be retried once credit is available.
#[derive(Debug, Clone)]
pub struct PendingSend {
    /// The envelope to (re-)attempt once credit or pause state allows it.
    pub envelope: Envelope,
    /// The binary payload bound to `envelope`, if any.
    pub binary: Option<Bytes>,
}

/// Outcome of [`FlowController::try_send`].
#[derive(Debug)]
pub enum TrySend {
    /// Credit was available and has been deducted; the caller may assign
    /// `seq`/`ack` and transmit `envelope`/`binary` now.
    Ready(Envelope, Option<Bytes>),
    /// The channel is paused or out of credit; `envelope`/`binary` have been
    /// queued and will be returned by a later [`FlowController::drain_pending`].
    Deferred,
}

fn encoded_size(envelope: &Envelope, binary: Option<&Bytes>) -> u64 {
    let base = envelope::encode(envelope).map(|s| s.len() as u64).unwrap_or(0);
    base + binary.map_or(0, |b| b.len() as u64)
}

impl FlowController {
    /// Construct a controller with the given initial/max credit per channel
    /// and low-water threshold, applying per-channel config overrides where
    /// present.
    pub fn new(
        initial: HashMap<Channel, ChannelCredit>,
        max: HashMap<Channel, ChannelCredit>,
        low_water_threshold: f64,
        max_pending_per_channel: usize,
    ) -> Self {
        let mut pools = HashMap::new();
        for channel in Channel::ALL {
            let init = initial
                .get(&channel)
                .copied()
                .unwrap_or_else(|| ChannelCredit::default_for(channel));
            let mx = max.get(&channel).copied().unwrap_or(init);
            pools.insert(channel, CreditPool::new(init, mx, low_water_threshold));
        }
        Self {
            pools,
            pending: HashMap::new(),
            max_pending_per_channel,
            requested: std::collections::HashSet::new(),
        }
    }

    /// Construct a controller using spec-default credit on every channel.
    pub fn with_defaults(low_water_threshold: f64, max_pending_per_channel: usize) -> Self {
        Self::new(
            HashMap::new(),
            HashMap::new(),
            low_water_threshold,
            max_pending_per_channel,
        )
    }

    fn pool_mut(&mut self, channel: Channel) -> &mut CreditPool {
        self.pools
            .entry(channel)
            .or_insert_with(|| CreditPool::new(
                ChannelCredit::default_for(channel),
                ChannelCredit::default_for(channel),
                0.25,
            ))
    }

    /// Borrow the pool for `channel`.
    pub fn pool(&self, channel: Channel) -> Option<&CreditPool> {
        self.pools.get(&channel)
    }

    /// Attempt to transmit `envelope` (with `binary`, if any) on `channel`
    /// (spec §4.4 sender rule).
    ///
    /// On success, credit is deducted and [`TrySend::Ready`] is returned,
    /// carrying `envelope`/`binary` back for the caller to assign `seq`/`ack`
    /// and transmit. If the channel is paused or out of credit, they are
    /// queued untouched (`seq` not yet assigned) and [`TrySend::Deferred`] is
    /// returned; `FLOW_CONTROL_VIOLATION` if that buffer is already full.
    pub fn try_send(&mut self, channel: Channel, envelope: Envelope, binary: Option<Bytes>) -> Result<TrySend> {
        let size = encoded_size(&envelope, binary.as_ref());
        {
            let pool = self.pool_mut(channel);
            if pool.can_send(size) {
                pool.deduct(size, channel)?;
                return Ok(TrySend::Ready(envelope, binary));
            }
        }

        let queue = self.pending.entry(channel).or_default();
        if queue.len() >= self.max_pending_per_channel {
            return Err(HaipError::FlowControlViolation {
                channel: channel.to_string(),
                reason: "pending send buffer overflow".to_string(),
            });
        }
        queue.push(PendingSend { envelope, binary });
        Ok(TrySend::Deferred)
    }

    /// Take every send deferred on `channel`, in the order they were queued,
    /// for the caller to retry. Called after a `FLOW_UPDATE` grant or
    /// `RESUME_CHANNEL`; retrying each through [`Self::try_send`] again
    /// re-defers whatever still doesn't fit rather than assuming the whole
    /// backlog now fits.
    pub fn drain_pending(&mut self, channel: Channel) -> Vec<(Envelope, Option<Bytes>)> {
        self.pending
            .remove(&channel)
            .unwrap_or_default()
            .into_iter()
            .map(|p| (p.envelope, p.binary))
            .collect()
    }

    /// Apply an inbound `FLOW_UPDATE` grant.
    pub fn grant(&mut self, channel: Channel, add_messages: u64, add_bytes: u64) {
        self.pool_mut(channel).grant(add_messages, add_bytes);
        self.requested.remove(&channel);
    }

    /// Toggle pause state for `channel`.
    pub fn set_paused(&mut self, channel: Channel, paused: bool) {
        self.pool_mut(channel).set_paused(paused);
    }

    /// Whether `channel`'s pool has dropped below its low-water mark.
    pub fn needs_grant_request(&self, channel: Channel) -> bool {
        self.pools
            .get(&channel)
            .map(|p| p.below_low_water())
            .unwrap_or(false)
    }

    /// Deduct credit for a freshly transmitted envelope on `channel`,
    /// returning whether this send has now crossed the low-water threshold
    /// and a grant request should be emitted (spec §4.4 sender rule). The
    /// send has already happened by the time the writer calls this, so an
    /// already-exhausted pool just stays at zero rather than erroring.
    pub fn record_send(&mut self, channel: Channel, envelope_size: u64) -> bool {
        let pool = self.pool_mut(channel);
        let _ = pool.deduct(envelope_size, channel);
        pool.below_low_water()
    }

    /// The `{add_messages, add_bytes}` to request in an outbound
    /// `FLOW_UPDATE` for `channel`, sized to refill it to its maximum.
    pub fn request_amounts(&self, channel: Channel) -> (u64, u64) {
        self.pools
            .get(&channel)
            .map(|p| p.needed_to_fill())
            .unwrap_or((0, 0))
    }

    /// Whether a grant request is already outstanding for `channel`.
    pub fn request_already_sent(&self, channel: Channel) -> bool {
        self.requested.contains(&channel)
    }

    /// Record that a grant request was just emitted for `channel`.
    pub fn mark_requested(&mut self, channel: Channel) {
        self.requested.insert(channel);
    }
}
