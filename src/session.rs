//! Session manager (spec §4.7)
//!
//! Owns the handshake protocol (`HAI`/`HAI` exchange), the per-session
//! component state (sequencers, replay window, flow controller, run and
//! tool managers), and the heartbeat/idle-reaping rules. Session state is
//! mutated only by the owning session's reader/writer tasks; the manager's
//! lookup table is touched only on connect, resume, and close (spec §5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::Config;
use crate::envelope::Channel;
use crate::error::{HaipError, Result};
use crate::flow::{ChannelCredit, FlowController};
use crate::replay::ReplayWindow;
use crate::run::RunManager;
use crate::sequence::{InboundTracker, OutboundSequencer};
use crate::tool::ToolManager;

/// Protocol major version this engine implements.
pub const HAIP_MAJOR_VERSION: u32 = 1;

/// The `HAI` handshake payload (spec §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaiPayload {
    /// Full semantic version string of the sender's implementation.
    pub haip_version: String,
    /// Major versions the sender is willing to speak.
    pub accept_major: Vec<u32>,
    /// Event type names the sender is prepared to receive.
    #[serde(default)]
    pub accept_events: Vec<String>,
    /// Sender-defined capability announcements.
    #[serde(default)]
    pub capabilities: Option<Value>,
    /// Highest inbound `seq` the sender has durably processed, for resume.
    #[serde(default)]
    pub last_rx_seq: Option<u64>,
}

/// Outcome of processing an inbound `HAI` handshake.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// A brand-new session was created.
    New(String),
    /// An existing session was resumed; carries the envelopes (and bound
    /// binaries) that must be replayed before live traffic resumes.
    Resumed(String),
}

/// Per-session protocol state, owned exclusively by that session's tasks.
pub struct Session {
    /// Server-assigned session identifier.
    pub id: String,
    /// Negotiated major version.
    pub haip_version: u32,
    /// Event types this peer declared it accepts.
    pub accept_events: Vec<String>,
    /// Outbound sequence generator.
    pub outbound_seq: OutboundSequencer,
    /// Inbound delivery tracker.
    pub inbound: InboundTracker,
    /// Outbound replay buffer.
    pub replay: ReplayWindow,
    /// Per-channel credit pools for this session's outbound direction.
    pub flow: FlowController,
    /// Active runs.
    pub runs: RunManager,
    /// In-flight tool calls.
    pub tools: ToolManager,
    /// Last time any inbound frame was observed, for idle reaping.
    pub last_seen: Instant,
    /// Nonce of an outstanding `PING` awaiting `PONG`, if any.
    pub pending_ping: Option<String>,
    /// Whether the transport is currently attached (false while a resumable
    /// session awaits reconnection).
    pub connected: bool,
}

impl Session {
    /// Construct the client-side session used to drive a connection before
    /// the server has assigned a session identifier. The placeholder id is
    /// overwritten with the server's assignment once the `HAI` reply arrives
    /// (spec §6.1: the server, not the client, mints session identifiers).
    pub fn bootstrap(accept_events: Vec<String>, config: &Config) -> Self {
        Self::new(Uuid::new_v4().to_string(), HAIP_MAJOR_VERSION, accept_events, config)
    }

    fn new(id: String, haip_version: u32, accept_events: Vec<String>, config: &Config) -> Self {
        Self {
            id,
            haip_version,
            accept_events,
            outbound_seq: OutboundSequencer::new(),
            inbound: InboundTracker::new(config.replay_gap_window),
            replay: ReplayWindow::new(config.replay_window_size, config.replay_window_time()),
            flow: {
                let initial: HashMap<Channel, ChannelCredit> = config
                    .channel_credits
                    .iter()
                    .map(|(&chan, cfg)| (chan, ChannelCredit::from(*cfg)))
                    .collect();
                let max: HashMap<Channel, ChannelCredit> = config
                    .channel_credits
                    .iter()
                    .map(|(&chan, cfg)| {
                        (
                            chan,
                            ChannelCredit {
                                messages: cfg.max_messages,
                                bytes: cfg.max_bytes,
                            },
                        )
                    })
                    .collect();
                FlowController::new(
                    initial,
                    max,
                    config.flow_control.low_water_threshold,
                    config.flow_control.max_pending_per_channel,
                )
            },
            runs: RunManager::new(config.max_concurrent_runs),
            tools: ToolManager::new(),
            last_seen: Instant::now(),
            pending_ping: None,
            connected: true,
        }
    }

    /// Touch the idle clock; called whenever any inbound frame arrives.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Whether this session has been idle past `heartbeat_timeout` with an
    /// unanswered ping outstanding (spec §4.7).
    pub fn is_unhealthy(&self, heartbeat_timeout: Duration) -> bool {
        self.pending_ping.is_some() && self.last_seen.elapsed() >= heartbeat_timeout
    }
}

/// Owns the session lookup table shared across a server's connections.
///
/// Each session is stored behind an `Arc<Mutex<_>>` so the engine's
/// reader/writer tasks for that session can share it directly; callers
/// obtain a clone via [`Self::get`] rather than a borrow. The manager itself
/// expects to be wrapped in whatever synchronization primitive its executor
/// requires (spec §5).
#[derive(Default)]
pub struct SessionManager {
    sessions: HashMap<String, Arc<Mutex<Session>>>,
}

impl SessionManager {
    /// Construct an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an inbound `HAI` handshake, creating or resuming a session.
    ///
    /// # Errors
    /// [`HaipError::VersionIncompatible`] if none of `payload.accept_major`
    /// names a version this engine supports. [`HaipError::ResumeFailed`] if
    /// `last_rx_seq` is present but either no session exists with a matching
    /// identifier or the requested replay point is below the window floor.
    pub fn handshake(
        &mut self,
        session_hint: Option<&str>,
        payload: &HaiPayload,
        config: &Config,
    ) -> Result<HandshakeOutcome> {
        if !payload.accept_major.contains(&HAIP_MAJOR_VERSION) {
            return Err(HaipError::VersionIncompatible {
                supported: vec![HAIP_MAJOR_VERSION],
            });
        }

        if let Some(last_rx_seq) = payload.last_rx_seq {
            let session_id = session_hint.ok_or_else(|| HaipError::ResumeFailed {
                session: String::new(),
            })?;
            return self.resume(session_id, last_rx_seq);
        }

        let id = Uuid::new_v4().to_string();
        let session = Session::new(
            id.clone(),
            HAIP_MAJOR_VERSION,
            payload.accept_events.clone(),
            config,
        );
        self.sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        Ok(HandshakeOutcome::New(id))
    }

    fn resume(&mut self, session_id: &str, last_rx_seq: u64) -> Result<HandshakeOutcome> {
        let session_arc = self.sessions.get(session_id).ok_or_else(|| HaipError::ResumeFailed {
            session: session_id.to_string(),
        })?;
        let mut session = session_arc.lock().expect("session mutex poisoned");

        if last_rx_seq > 0 && last_rx_seq < session.replay.floor() {
            return Err(HaipError::ResumeFailed {
                session: session_id.to_string(),
            });
        }

        session.connected = true;
        session.touch();
        Ok(HandshakeOutcome::Resumed(session_id.to_string()))
    }

    /// Clone a shared handle to a session, for binding to engine tasks.
    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(session_id).cloned()
    }

    /// Mark a session's transport as detached, without discarding state
    /// (spec §5: retained for `replayWindowTime` to permit resume).
    pub fn disconnect(&mut self, session_id: &str) {
        if let Some(session) = self.sessions.get(session_id) {
            session.lock().expect("session mutex poisoned").connected = false;
        }
    }

    /// Drop any disconnected session whose replay window has aged out.
    pub fn reap_expired(&mut self, replay_window_time: Duration) {
        self.sessions.retain(|_, session| {
            let session = session.lock().expect("session mutex poisoned");
            session.connected || session.last_seen.elapsed() < replay_window_time
        });
    }

    /// Number of sessions currently tracked (connected or resumable).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are tracked.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(accept_major: Vec<u32>, last_rx_seq: Option<u64>) -> HaiPayload {
        HaiPayload {
            haip_version: "1.1.2".to_string(),
            accept_major,
            accept_events: vec![],
            capabilities: None,
            last_rx_seq,
        }
    }

    #[test]
    fn fresh_handshake_creates_new_session() {
        let mut mgr = SessionManager::new();
        let config = Config::default();
        let outcome = mgr.handshake(None, &payload(vec![1], None), &config).unwrap();
        match outcome {
            HandshakeOutcome::New(id) => assert!(mgr.get(&id).is_some()),
            _ => panic!("expected New"),
        }
    }

    #[test]
    fn unsupported_major_version_is_rejected() {
        let mut mgr = SessionManager::new();
        let config = Config::default();
        let err = mgr.handshake(None, &payload(vec![99], None), &config).unwrap_err();
        assert_eq!(err.code(), "VERSION_INCOMPATIBLE");
    }

    #[test]
    fn resume_unknown_session_fails() {
        let mut mgr = SessionManager::new();
        let config = Config::default();
        let err = mgr
            .handshake(Some("ghost"), &payload(vec![1], Some(5)), &config)
            .unwrap_err();
        assert_eq!(err.code(), "RESUME_FAILED");
    }

    #[test]
    fn resume_known_session_reattaches() {
        let mut mgr = SessionManager::new();
        let config = Config::default();
        let id = match mgr.handshake(None, &payload(vec![1], None), &config).unwrap() {
            HandshakeOutcome::New(id) => id,
            _ => unreachable!(),
        };
        mgr.disconnect(&id);
        assert!(!mgr.get(&id).unwrap().lock().unwrap().connected);

        let outcome = mgr
            .handshake(Some(&id), &payload(vec![1], Some(0)), &config)
            .unwrap();
        match outcome {
            HandshakeOutcome::Resumed(resumed_id) => assert_eq!(resumed_id, id),
            _ => panic!("expected Resumed"),
        }
        assert!(mgr.get(&id).unwrap().lock().unwrap().connected);
    }

    #[test]
    fn disconnected_session_survives_until_reaped() {
        let mut mgr = SessionManager::new();
        let config = Config::default();
        let id = match mgr.handshake(None, &payload(vec![1], None), &config).unwrap() {
            HandshakeOutcome::New(id) => id,
            _ => unreachable!(),
        };
        mgr.disconnect(&id);
        mgr.reap_expired(Duration::from_secs(300));
        assert_eq!(mgr.len(), 1);

        mgr.reap_expired(Duration::from_secs(0));
        assert_eq!(mgr.len(), 0);
    }
}
