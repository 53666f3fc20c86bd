//! Protocol engine (spec §4.9)
//!
//! Per session, owns a single-writer task that drains an outbound queue
//! into the transport, a single-reader task that demuxes the transport
//! into the component handlers (sequence tracker, flow controller, run and
//! tool managers), and a heartbeat task that pings the peer and watches for
//! an unanswered pong. Publishes observable events to the façade.
//!
//! Session state itself lives behind a single `std::sync::Mutex` shared by
//! all three tasks, rather than split ownership per task: this keeps the
//! accounting (sequence numbers, replay window, credit pools) in one place
//! and trivially consistent. The lock is never held across an `.await`, so a
//! blocking mutex is sufficient and avoids contaminating the session API
//! with async. Cross-session state is never touched from here.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::envelope::{self, Channel, Envelope, EventType};
use crate::error::{HaipError, Result};
use crate::flow::TrySend;
use crate::run::{Run, RunStatus};
use crate::sequence::DeliveryOutcome;
use crate::session::Session;
use crate::tool::CallStatus;

/// Observable events published by the engine to the hosting façade (spec
/// §4.9: `connect`, `disconnect`, `handshake`, `message`, `binary`,
/// `runStarted`, `runFinished`, `toolCall`, `error`).
#[derive(Debug)]
pub enum EngineEvent {
    /// The transport attached to this session is open.
    Connect,
    /// The transport detached, with a human-readable reason.
    Disconnect(String),
    /// A non-control envelope arrived and was delivered in order.
    Message(Envelope),
    /// A binary frame arrived, bound to the envelope that announced it.
    Binary(Envelope, Bytes),
    /// A run transitioned to active.
    RunStarted(Run),
    /// A run reached a terminal state.
    RunFinished(String, RunStatus),
    /// A `TOOL_CALL` passed schema validation and was queued.
    ToolCall(String, String, Option<String>, Value),
    /// A protocol error occurred; may or may not be fatal.
    Error(HaipError),
}

/// A pending outbound send.
pub enum Outbound {
    /// A fresh send: the writer assigns `seq`/`ack`, records it in the
    /// replay window, and accounts it against the channel's credit pool.
    New {
        /// The envelope to transmit (its `seq`/`ack` are assigned at send time).
        envelope: Envelope,
        /// Binary payload to emit immediately after the envelope, if any.
        binary: Option<Bytes>,
    },
    /// A re-send of a previously recorded envelope, serving either a peer's
    /// `REPLAY_REQUEST` or a resumed session's catch-up: transmitted
    /// verbatim, with its original `seq`/`ack` preserved and without being
    /// re-recorded into the replay window.
    Replay {
        /// The envelope exactly as originally transmitted.
        envelope: Envelope,
        /// The binary payload originally bound to it, if any.
        binary: Option<Bytes>,
    },
}

/// Handle to a running engine instance for one session.
#[derive(Clone)]
pub struct EngineHandle {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl EngineHandle {
    /// Enqueue an envelope (with optional bound binary) for transmission.
    /// The writer task assigns `seq`/`ack` and records it in the replay
    /// window before handing it to the transport.
    pub fn enqueue(&self, envelope: Envelope, binary: Option<Bytes>) -> Result<()> {
        self.outbound_tx
            .send(Outbound::New { envelope, binary })
            .map_err(|_| HaipError::Timeout("engine writer task has exited".to_string()))
    }

    /// Enqueue a previously recorded envelope for verbatim re-send, serving
    /// a `REPLAY_REQUEST` or a resumed session's catch-up.
    pub fn enqueue_replay(&self, envelope: Envelope, binary: Option<Bytes>) -> Result<()> {
        self.outbound_tx
            .send(Outbound::Replay { envelope, binary })
            .map_err(|_| HaipError::Timeout("engine writer task has exited".to_string()))
    }
}

/// Spawn the reader, writer, and heartbeat tasks for one session over
/// `transport`.
///
/// Returns an [`EngineHandle`] for enqueuing outbound sends; observable
/// events are delivered on `event_tx`. `heartbeat_interval` is how often a
/// `PING` is sent while idle; `heartbeat_timeout` is how long an unanswered
/// `PING` is tolerated before the session is marked unhealthy.
pub fn spawn(
    session: Arc<Mutex<Session>>,
    transport: Arc<dyn crate::transport::Transport>,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) -> EngineHandle {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    spawn_writer(
        Arc::clone(&session),
        Arc::clone(&transport),
        outbound_rx,
        outbound_tx.clone(),
    );
    spawn_reader(Arc::clone(&session), transport, event_tx.clone(), outbound_tx.clone());
    spawn_heartbeat(session, outbound_tx.clone(), heartbeat_interval, heartbeat_timeout);

    let _ = event_tx.send(EngineEvent::Connect);
    EngineHandle { outbound_tx }
}

fn spawn_writer(
    session: Arc<Mutex<Session>>,
    transport: Arc<dyn crate::transport::Transport>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    self_tx: mpsc::UnboundedSender<Outbound>,
) {
    tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            let (mut envelope, mut binary, is_replay) = match item {
                Outbound::New { envelope, binary } => (envelope, binary, false),
                Outbound::Replay { envelope, binary } => (envelope, binary, true),
            };

            let mut grant_request: Option<(String, Channel, u64, u64)> = None;
            let encoded = {
                let mut guard = session.lock().expect("session mutex poisoned");

                if !is_replay {
                    let channel = envelope.channel;
                    match guard.flow.try_send(channel, envelope, binary) {
                        Ok(TrySend::Ready(e, b)) => {
                            envelope = e;
                            binary = b;
                        }
                        Ok(TrySend::Deferred) => continue,
                        Err(e) => {
                            tracing::warn!(target: "haip::engine", "dropping send on {}: {}", channel, e);
                            continue;
                        }
                    }
                    envelope.seq = guard.outbound_seq.next();
                    envelope.ack = Some(guard.inbound.cumulative_ack());
                }

                let encoded = match envelope::encode(&envelope) {
                    Ok(e) => e,
                    Err(_) => continue,
                };

                if !is_replay {
                    guard.replay.record(envelope.clone(), binary.clone());

                    let channel = envelope.channel;
                    if guard.flow.needs_grant_request(channel) && !guard.flow.request_already_sent(channel) {
                        guard.flow.mark_requested(channel);
                        let (add_messages, add_bytes) = guard.flow.request_amounts(channel);
                        grant_request = Some((guard.id.clone(), channel, add_messages, add_bytes));
                    }
                }
                encoded
            };

            if transport
                .send(crate::transport::Frame::Text(encoded))
                .await
                .is_err()
            {
                break;
            }
            if let Some(bin) = binary {
                if transport
                    .send(crate::transport::Frame::Binary(bin))
                    .await
                    .is_err()
                {
                    break;
                }
            }

            if let Some((session_id, channel, add_messages, add_bytes)) = grant_request {
                let request = Envelope::new(
                    session_id,
                    Channel::System,
                    EventType::FlowUpdate,
                    json!({
                        "channel": channel.as_str(),
                        "add_messages": add_messages,
                        "add_bytes": add_bytes,
                    }),
                );
                let _ = self_tx.send(Outbound::New { envelope: request, binary: None });
            }
        }
    });
}

fn spawn_reader(
    session: Arc<Mutex<Session>>,
    transport: Arc<dyn crate::transport::Transport>,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
) {
    tokio::spawn(async move {
        use futures::StreamExt;
        let mut frames = transport.receive();
        let mut pending_envelope: Option<Envelope> = None;

        while let Some(frame) = frames.next().await {
            match frame {
                crate::transport::Frame::Text(raw) => {
                    let envelope = match envelope::decode(&raw) {
                        Ok(e) => e,
                        Err(e) => {
                            let _ = event_tx.send(EngineEvent::Error(e));
                            continue;
                        }
                    };

                    if envelope.expects_binary() {
                        pending_envelope = Some(envelope);
                        continue;
                    }

                    if let Some(outcome) = deliver(&session, &event_tx, &outbound_tx, envelope).await {
                        dispatch(&session, &event_tx, &outbound_tx, outcome).await;
                    }
                }
                crate::transport::Frame::Binary(bytes) => {
                    let Some(envelope) = pending_envelope.take() else {
                        let _ = event_tx.send(EngineEvent::Error(HaipError::BinaryFrameError(
                            "binary frame with no announcing envelope".to_string(),
                        )));
                        continue;
                    };
                    let _ = event_tx.send(EngineEvent::Binary(envelope.clone(), bytes));
                    if let Some(outcome) = deliver(&session, &event_tx, &outbound_tx, envelope).await {
                        dispatch(&session, &event_tx, &outbound_tx, outcome).await;
                    }
                }
            }
        }

        let _ = event_tx.send(EngineEvent::Disconnect("transport closed".to_string()));
        let mut guard = session.lock().expect("session mutex poisoned");
        guard.connected = false;
    });
}

/// Ping the peer at `heartbeat_interval` while the session is connected;
/// if a `PING` goes unanswered past `heartbeat_timeout`, mark the session
/// disconnected. The engine has no transport-level shutdown primitive, so
/// this is a best-effort local disconnect rather than a forced socket
/// teardown (see DESIGN.md).
fn spawn_heartbeat(
    session: Arc<Mutex<Session>>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await; // first tick fires immediately; skip it.
        loop {
            ticker.tick().await;

            let (session_id, connected, unhealthy) = {
                let guard = session.lock().expect("session mutex poisoned");
                (guard.id.clone(), guard.connected, guard.is_unhealthy(heartbeat_timeout))
            };
            if !connected {
                break;
            }
            if unhealthy {
                let mut guard = session.lock().expect("session mutex poisoned");
                guard.connected = false;
                break;
            }

            let nonce = Uuid::new_v4().to_string();
            {
                let mut guard = session.lock().expect("session mutex poisoned");
                guard.pending_ping = Some(nonce.clone());
            }
            let ping = Envelope::new(session_id, Channel::System, EventType::Ping, json!({"nonce": nonce}));
            if outbound_tx.send(Outbound::New { envelope: ping, binary: None }).is_err() {
                break;
            }
        }
    });
}

/// Feed one inbound envelope through the sequence tracker, returning the
/// envelopes now ready for dispatch (in order), if any. A persistent gap
/// both surfaces a local [`EngineEvent::Error`] and sends a real
/// `REPLAY_REQUEST` to the peer.
async fn deliver(
    session: &Arc<Mutex<Session>>,
    event_tx: &mpsc::UnboundedSender<EngineEvent>,
    outbound_tx: &mpsc::UnboundedSender<Outbound>,
    envelope: Envelope,
) -> Option<Vec<Envelope>> {
    let mut guard = session.lock().expect("session mutex poisoned");
    guard.touch();
    match guard.inbound.receive(envelope) {
        DeliveryOutcome::Delivered(envelopes) => Some(envelopes),
        DeliveryOutcome::Duplicate | DeliveryOutcome::Buffered => None,
        DeliveryOutcome::BufferedGapExceeded { from_seq, to_seq } => {
            let session_id = guard.id.clone();
            drop(guard);

            let request = Envelope::new(
                session_id,
                Channel::System,
                EventType::ReplayRequest,
                json!({ "from_seq": from_seq, "to_seq": to_seq }),
            );
            let _ = outbound_tx.send(Outbound::New { envelope: request, binary: None });

            let _ = event_tx.send(EngineEvent::Error(HaipError::SeqViolation {
                expected: from_seq,
                got: to_seq,
            }));
            None
        }
    }
}

async fn dispatch(
    session: &Arc<Mutex<Session>>,
    event_tx: &mpsc::UnboundedSender<EngineEvent>,
    outbound_tx: &mpsc::UnboundedSender<Outbound>,
    envelopes: Vec<Envelope>,
) {
    for envelope in envelopes {
        match envelope.kind {
            EventType::Ping => {
                let nonce = envelope.payload.get("nonce").cloned().unwrap_or(Value::Null);
                let session_id = session.lock().expect("session mutex poisoned").id.clone();
                let pong = Envelope::new(session_id, Channel::System, EventType::Pong, json!({"nonce": nonce}));
                let _ = outbound_tx.send(Outbound::New { envelope: pong, binary: None });
                let _ = event_tx.send(EngineEvent::Message(envelope));
            }
            EventType::Pong => {
                let mut guard = session.lock().expect("session mutex poisoned");
                guard.pending_ping = None;
            }
            EventType::Ack => {}
            EventType::ReplayRequest => {
                let from_seq = envelope.payload.get("from_seq").and_then(Value::as_u64);
                let to_seq = envelope.payload.get("to_seq").and_then(Value::as_u64);
                let Some(from_seq) = from_seq else { continue };

                let (session_id, outcome) = {
                    let guard = session.lock().expect("session mutex poisoned");
                    let last_emitted = guard.outbound_seq.last_emitted();
                    let outcome = guard.replay.replay(from_seq, to_seq, last_emitted);
                    (guard.id.clone(), outcome)
                };

                match outcome {
                    Ok(entries) => {
                        for entry in entries {
                            let _ = outbound_tx.send(Outbound::Replay {
                                envelope: entry.envelope,
                                binary: entry.binary,
                            });
                        }
                    }
                    Err(e) => {
                        let error_envelope = Envelope::new(
                            session_id,
                            Channel::System,
                            EventType::Error,
                            json!({
                                "code": e.code(),
                                "message": e.to_string(),
                            }),
                        );
                        let _ = outbound_tx.send(Outbound::New { envelope: error_envelope, binary: None });
                    }
                }
            }
            EventType::RunStarted => {
                let run_id = envelope
                    .payload
                    .get("run_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let thread_id = envelope
                    .payload
                    .get("thread_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let metadata = envelope.payload.get("metadata").cloned();
                let mut guard = session.lock().expect("session mutex poisoned");
                match guard.runs.start(run_id, thread_id, metadata) {
                    Ok(run) => {
                        drop(guard);
                        let _ = event_tx.send(EngineEvent::RunStarted(run));
                    }
                    Err(e) => {
                        drop(guard);
                        let _ = event_tx.send(EngineEvent::Error(e));
                    }
                }
            }
            EventType::RunFinished => {
                finish_run(session, event_tx, &envelope, RunStatus::Finished).await;
            }
            EventType::RunCancel => {
                finish_run(session, event_tx, &envelope, RunStatus::Cancelled).await;
            }
            EventType::RunError => {
                finish_run(session, event_tx, &envelope, RunStatus::Errored).await;
            }
            EventType::ToolCall => {
                let call_id = envelope.payload.get("call_id").and_then(Value::as_str).map(str::to_string);
                let tool = envelope.payload.get("tool").and_then(Value::as_str).map(str::to_string);
                let run_id = envelope.payload.get("run_id").and_then(Value::as_str).map(str::to_string);
                let params = envelope.payload.get("params").cloned().unwrap_or_else(|| json!({}));
                if let (Some(call_id), Some(tool)) = (call_id, tool) {
                    let (session_id, outcome) = {
                        let mut guard = session.lock().expect("session mutex poisoned");
                        let outcome = guard
                            .tools
                            .start_call(call_id.clone(), tool.clone(), run_id.clone(), &params)
                            .map(|_| ());
                        (guard.id.clone(), outcome)
                    };
                    match outcome {
                        Ok(()) => {
                            let _ = event_tx.send(EngineEvent::ToolCall(call_id, tool, run_id, params));
                        }
                        Err(e) => {
                            let (error_code, details) = match &e {
                                HaipError::ToolNotFound(_) => ("unknown_tool", None),
                                HaipError::ToolSchemaViolation(msg) => ("schema", Some(msg.clone())),
                                _ => ("error", Some(e.to_string())),
                            };
                            let mut result = json!({ "error": error_code });
                            if let Some(details) = details {
                                result["details"] = json!(details);
                            }
                            let done = Envelope::new(
                                session_id,
                                Channel::Agent,
                                EventType::ToolDone,
                                json!({
                                    "call_id": call_id,
                                    "status": "ERROR",
                                    "result": result,
                                }),
                            );
                            let _ = outbound_tx.send(Outbound::New { envelope: done, binary: None });
                            let _ = event_tx.send(EngineEvent::Error(e));
                        }
                    }
                }
            }
            EventType::ToolCancel => {
                if let Some(call_id) = envelope.payload.get("call_id").and_then(Value::as_str) {
                    let mut guard = session.lock().expect("session mutex poisoned");
                    let _ = guard.tools.request_cancel(call_id);
                }
            }
            EventType::ToolDone => {
                if let (Some(call_id), Some(status)) = (
                    envelope.payload.get("call_id").and_then(Value::as_str),
                    envelope.payload.get("status").and_then(Value::as_str),
                ) {
                    let status = match status {
                        "OK" => Some(CallStatus::Ok),
                        "CANCELLED" => Some(CallStatus::Cancelled),
                        "ERROR" => Some(CallStatus::Error),
                        _ => None,
                    };
                    if let Some(status) = status {
                        let mut guard = session.lock().expect("session mutex poisoned");
                        let _ = guard.tools.finish_call(call_id, status);
                    }
                }
                let _ = event_tx.send(EngineEvent::Message(envelope));
            }
            EventType::FlowUpdate => {
                if let Ok(channel) = envelope.channel_field() {
                    let add_messages = envelope.payload.get("add_messages").and_then(Value::as_u64).unwrap_or(0);
                    let add_bytes = envelope.payload.get("add_bytes").and_then(Value::as_u64).unwrap_or(0);
                    let released = {
                        let mut guard = session.lock().expect("session mutex poisoned");
                        guard.flow.grant(channel, add_messages, add_bytes);
                        guard.flow.drain_pending(channel)
                    };
                    for (envelope, binary) in released {
                        let _ = outbound_tx.send(Outbound::New { envelope, binary });
                    }
                }
            }
            EventType::PauseChannel => {
                if let Ok(channel) = envelope.channel_field() {
                    let mut guard = session.lock().expect("session mutex poisoned");
                    guard.flow.set_paused(channel, true);
                }
            }
            EventType::ResumeChannel => {
                if let Ok(channel) = envelope.channel_field() {
                    let released = {
                        let mut guard = session.lock().expect("session mutex poisoned");
                        guard.flow.set_paused(channel, false);
                        guard.flow.drain_pending(channel)
                    };
                    for (envelope, binary) in released {
                        let _ = outbound_tx.send(Outbound::New { envelope, binary });
                    }
                }
            }
            _ => {
                let _ = event_tx.send(EngineEvent::Message(envelope));
            }
        }
    }
}

async fn finish_run(
    session: &Arc<Mutex<Session>>,
    event_tx: &mpsc::UnboundedSender<EngineEvent>,
    envelope: &Envelope,
    status: RunStatus,
) {
    let Some(run_id) = envelope.payload.get("run_id").and_then(Value::as_str) else {
        return;
    };
    let mut guard = session.lock().expect("session mutex poisoned");
    let result = match status {
        RunStatus::Finished => guard.runs.finish(run_id),
        RunStatus::Cancelled => guard.runs.cancel(run_id),
        RunStatus::Errored => guard.runs.error(run_id),
        RunStatus::Active => unreachable!(),
    };
    match result {
        Ok(run) => {
            drop(guard);
            let _ = event_tx.send(EngineEvent::RunFinished(run.run_id, run.status));
        }
        Err(e) => {
            drop(guard);
            let _ = event_tx.send(EngineEvent::Error(e));
        }
    }
}

impl Envelope {
    /// Parse the `channel` field of a `FLOW_UPDATE`/`PAUSE_CHANNEL`/
    /// `RESUME_CHANNEL` payload, which names a target channel distinct from
    /// the envelope's own framing channel (both are `SYSTEM`).
    fn channel_field(&self) -> Result<Channel> {
        let name = self
            .payload
            .get("channel")
            .and_then(Value::as_str)
            .ok_or_else(|| HaipError::ProtocolViolation {
                field: "channel".to_string(),
            })?;
        name.parse()
    }
}
