//! Server façade (spec §6.2)
//!
//! Binds the three transport variants to a shared [`SessionManager`]:
//!
//! - `GET /haip/websocket` -- duplex socket, upgraded in-handler.
//! - `POST /haip/stream` -- bidirectional chunked HTTP.
//! - `GET /haip/sse` + `POST /haip/handshake` + `POST /haip/message` --
//!   push+post, with a [`ServerPushPostTransport`] registered per session so
//!   the decoupled handlers can find and feed it.
//!
//! Credential presentation follows spec §6.3: query parameter `token=`,
//! `Authorization: Bearer`, or (duplex only) a protocol token `token.<jwt>`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use crate::auth::TokenValidator;
use crate::config::Config;
use crate::engine::{self, EngineEvent, EngineHandle};
use crate::envelope::{self, Channel, Envelope, EventType};
use crate::error::{HaipError, Result};
use crate::session::{HaiPayload, HandshakeOutcome, Session, SessionManager};
use crate::tool::{CallStatus, ToolDescriptor, ToolHandler, ToolProgress, UpdateEmitter};
use crate::transport::bidir::ServerBidirTransport;
use crate::transport::duplex::ServerDuplexTransport;
use crate::transport::pushpost::ServerPushPostTransport;
use crate::transport::Transport;

/// A tool descriptor plus its optional in-process implementation, applied to
/// every session's [`crate::tool::ToolManager`] at handshake time.
type ToolRegistration = (ToolDescriptor, Option<Arc<dyn ToolHandler>>);

/// Shared server state handed to every axum handler.
pub struct AppState {
    sessions: Mutex<SessionManager>,
    config: Config,
    validator: Arc<dyn TokenValidator>,
    push_post: Mutex<HashMap<String, Arc<ServerPushPostTransport>>>,
    started_at: std::time::Instant,
    tools: StdMutex<Vec<ToolRegistration>>,
}

impl AppState {
    /// Construct the shared state for a fresh server instance.
    pub fn new(config: Config, validator: Arc<dyn TokenValidator>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(SessionManager::new()),
            config,
            validator,
            push_post: Mutex::new(HashMap::new()),
            started_at: std::time::Instant::now(),
            tools: StdMutex::new(Vec::new()),
        })
    }

    /// Register a tool descriptor, with an optional in-process handler, to
    /// be advertised and servable on every session established from this
    /// point on (spec §4.6). Tool business logic itself is supplied by the
    /// embedder; this only wires it into the protocol's call lifecycle.
    pub fn register_tool(&self, descriptor: ToolDescriptor, handler: Option<Arc<dyn ToolHandler>>) {
        self.tools
            .lock()
            .expect("tool registry mutex poisoned")
            .push((descriptor, handler));
    }

    fn apply_tool_registrations(&self, session: &Arc<StdMutex<Session>>) {
        let registrations = self.tools.lock().expect("tool registry mutex poisoned");
        let mut guard = session.lock().expect("session mutex poisoned");
        for (descriptor, handler) in registrations.iter() {
            guard.tools.register(descriptor.clone(), handler.clone());
        }
    }
}

/// Build the axum router exposing all three transport variants plus
/// `/health` and `/stats`.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/haip/websocket", get(websocket_handler))
        .route("/haip/stream", post(bidir_handler))
        .route("/haip/sse", get(sse_handler))
        .route("/haip/handshake", post(handshake_handler))
        .route("/haip/message", post(message_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state.clone());

    if state.config.features.cors {
        router = router.layer(tower_http::cors::CorsLayer::permissive());
    }
    if state.config.features.compression {
        router = router.layer(tower_http::compression::CompressionLayer::new());
    }
    if state.config.features.logging {
        router = router.layer(tower_http::trace::TraceLayer::new_for_http());
    }
    router
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Extract the bearer credential per spec §6.3: query `token=`, an
/// `Authorization: Bearer` header, or a `token.<jwt>` websocket subprotocol.
fn extract_bearer(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = auth.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    if let Some(proto) = headers.get("sec-websocket-protocol") {
        if let Ok(value) = proto.to_str() {
            if let Some(token) = value.strip_prefix("token.") {
                return Some(token.to_string());
            }
        }
    }
    query_token.map(str::to_string)
}

async fn authenticate(state: &AppState, token: Option<String>) -> Result<()> {
    let Some(token) = token else {
        return Err(HaipError::AuthenticationFailed(
            "no credential presented".to_string(),
        ));
    };
    state.validator.validate(&token).await?;
    Ok(())
}

/// `GET /haip/websocket`: upgrade to a duplex socket, read the first inbound
/// frame as the `HAI` handshake, then hand off to the engine.
async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = extract_bearer(&headers, query.token.as_deref());
    if let Err(e) = authenticate(&state, token).await {
        return (StatusCode::UNAUTHORIZED, Json(error_body(&e))).into_response();
    }

    ws.on_upgrade(move |socket| async move {
        let transport: Arc<dyn Transport> = Arc::new(ServerDuplexTransport::new(socket));
        run_handshake_then_engine(state, transport).await;
    })
}

/// `POST /haip/stream`: read the request body as the handshake-bearing
/// bidirectional chunked stream.
async fn bidir_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Response {
    let token = extract_bearer(&headers, None);
    if let Err(e) = authenticate(&state, token).await {
        return (StatusCode::UNAUTHORIZED, Json(error_body(&e))).into_response();
    }

    let body_stream = body.into_data_stream();
    let transport: Arc<dyn Transport> = Arc::new(ServerBidirTransport::new(body_stream));
    run_handshake_then_engine(state, transport).await;
    StatusCode::OK.into_response()
}

/// Wait for the first inbound frame, treat it as `HAI`, register the
/// session, reply with the server's own `HAI`, then run the engine loop
/// until the transport closes.
async fn run_handshake_then_engine(state: Arc<AppState>, transport: Arc<dyn Transport>) {
    let mut frames = transport.receive();
    let Some(crate::transport::Frame::Text(raw)) = frames.next().await else {
        return;
    };
    drop(frames);

    let envelope = match envelope::decode(&raw) {
        Ok(e) => e,
        Err(_) => return,
    };
    let payload: HaiPayload = match serde_json::from_value(envelope.payload.clone()) {
        Ok(p) => p,
        Err(_) => return,
    };

    let session_hint = if payload.last_rx_seq.is_some() {
        Some(envelope.session.as_str())
    } else {
        None
    };

    let (session_id, session, resumed) = {
        let mut sessions = state.sessions.lock().await;
        match sessions.handshake(session_hint, &payload, &state.config) {
            Ok(HandshakeOutcome::New(id)) => {
                let session = sessions.get(&id).expect("just inserted");
                (id, session, false)
            }
            Ok(HandshakeOutcome::Resumed(id)) => {
                let session = sessions.get(&id).expect("just resumed");
                (id, session, true)
            }
            Err(e) => {
                let error_envelope = Envelope::new(
                    envelope.session.clone(),
                    Channel::System,
                    EventType::Error,
                    json!({"code": e.code(), "message": e.to_string()}),
                );
                if let Ok(raw) = envelope::encode(&error_envelope) {
                    let _ = transport.send(crate::transport::Frame::Text(raw)).await;
                }
                return;
            }
        }
    };

    state.apply_tool_registrations(&session);
    let session_for_replay = Arc::clone(&session);

    let (event_tx, event_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let handle = engine::spawn(
        session,
        Arc::clone(&transport),
        event_tx,
        state.config.heartbeat_interval(),
        state.config.heartbeat_timeout(),
    );

    let reply = Envelope::new(
        session_id.clone(),
        envelope.channel,
        envelope.kind,
        json!({
            "haip_version": "1.1.2",
            "accept_major": [crate::session::HAIP_MAJOR_VERSION],
            "accept_events": [],
            "resumed": resumed,
        }),
    );
    let _ = handle.enqueue(reply, None);

    if resumed {
        replay_on_resume(&session_for_replay, &handle, payload.last_rx_seq.unwrap_or(0));
    }

    process_engine_events(Arc::clone(&state), session_id.clone(), handle, event_rx).await;

    let mut sessions = state.sessions.lock().await;
    sessions.disconnect(&session_id);
}

/// Re-send everything the peer missed while disconnected, relying on the
/// writer task's single-queue FIFO order to place these entries ahead of any
/// subsequent live traffic (spec §5 resume, §9 Outbound single-writer
/// ordering guarantee).
fn replay_on_resume(session: &Arc<StdMutex<Session>>, handle: &EngineHandle, last_rx_seq: u64) {
    let entries = {
        let guard = session.lock().expect("session mutex poisoned");
        let last_emitted = guard.outbound_seq.last_emitted();
        guard.replay.replay(last_rx_seq + 1, None, last_emitted)
    };
    if let Ok(entries) = entries {
        for entry in entries {
            let _ = handle.enqueue_replay(entry.envelope, entry.binary);
        }
    }
}

/// `POST /haip/handshake`: register a push+post transport for the session
/// named in (or created by) the `HAI` payload, returning the session id.
async fn handshake_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    body: String,
) -> Response {
    let token = extract_bearer(&headers, query.token.as_deref());
    if let Err(e) = authenticate(&state, token).await {
        return (StatusCode::UNAUTHORIZED, Json(error_body(&e))).into_response();
    }

    let envelope = match envelope::decode(&body) {
        Ok(e) => e,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(error_body(&e))).into_response(),
    };
    let payload: HaiPayload = match serde_json::from_value(envelope.payload.clone()) {
        Ok(p) => p,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(error_body(&HaipError::ProtocolViolation {
                    field: "payload".to_string(),
                })),
            )
                .into_response()
        }
    };

    let session_hint = if payload.last_rx_seq.is_some() {
        Some(envelope.session.as_str())
    } else {
        None
    };

    let (session_id, session, resumed) = {
        let mut sessions = state.sessions.lock().await;
        match sessions.handshake(session_hint, &payload, &state.config) {
            Ok(HandshakeOutcome::New(id)) => {
                let session = sessions.get(&id).expect("just inserted");
                (id, session, false)
            }
            Ok(HandshakeOutcome::Resumed(id)) => {
                let session = sessions.get(&id).expect("just resumed");
                (id, session, true)
            }
            Err(e) => return (StatusCode::BAD_REQUEST, Json(error_body(&e))).into_response(),
        }
    };

    let transport = Arc::new(ServerPushPostTransport::new());
    state
        .push_post
        .lock()
        .await
        .insert(session_id.clone(), Arc::clone(&transport));

    state.apply_tool_registrations(&session);
    let session_for_replay = Arc::clone(&session);

    let (event_tx, event_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let handle = engine::spawn(
        session,
        transport,
        event_tx,
        state.config.heartbeat_interval(),
        state.config.heartbeat_timeout(),
    );
    tokio::spawn(process_engine_events(
        Arc::clone(&state),
        session_id.clone(),
        handle.clone(),
        event_rx,
    ));

    let reply = Envelope::new(
        session_id.clone(),
        envelope.channel,
        envelope.kind,
        json!({
            "haip_version": "1.1.2",
            "accept_major": [crate::session::HAIP_MAJOR_VERSION],
            "accept_events": [],
            "resumed": resumed,
        }),
    );
    let _ = handle.enqueue(reply, None);

    if resumed {
        replay_on_resume(&session_for_replay, &handle, payload.last_rx_seq.unwrap_or(0));
    }

    Json(json!({"session": session_id})).into_response()
}

/// Consume a session's observable engine events for its whole lifetime,
/// supplying the in-engine-scope responsibilities the protocol leaves to the
/// hosting façade (spec §4.9, §9 scenarios 2/3): echoing `RUN_STARTED`,
/// echoing accumulated `TEXT_MESSAGE_*` content back as an `AGENT` message,
/// and dispatching `TOOL_CALL` to a registered [`ToolHandler`] with timeout
/// enforcement. Tool business logic itself is supplied by the embedder via
/// [`AppState::register_tool`]; this only drives the call lifecycle.
async fn process_engine_events(
    state: Arc<AppState>,
    session_id: String,
    handle: EngineHandle,
    mut event_rx: mpsc::UnboundedReceiver<EngineEvent>,
) {
    let mut pending_text: HashMap<String, String> = HashMap::new();
    let tool_call_timeout = state.config.tool_call_timeout();

    while let Some(event) = event_rx.recv().await {
        match event {
            EngineEvent::RunStarted(run) => {
                let started = Envelope::new(
                    session_id.clone(),
                    Channel::System,
                    EventType::RunStarted,
                    json!({
                        "run_id": run.run_id,
                        "thread_id": run.thread_id,
                        "metadata": run.metadata,
                    }),
                );
                let _ = handle.enqueue(started, None);
            }
            EngineEvent::Message(envelope) => match envelope.kind {
                EventType::TextMessageStart => {
                    let text = envelope.payload.get("text").and_then(serde_json::Value::as_str).unwrap_or("");
                    pending_text.insert(message_id_of(&envelope), text.to_string());
                }
                EventType::TextMessagePart => {
                    let message_id = message_id_of(&envelope);
                    if let Some(text) = envelope.payload.get("text").and_then(serde_json::Value::as_str) {
                        pending_text.entry(message_id).or_default().push_str(text);
                    }
                }
                EventType::TextMessageEnd => {
                    let message_id = message_id_of(&envelope);
                    if let Some(text) = pending_text.remove(&message_id) {
                        let reply_id = uuid::Uuid::new_v4().to_string();
                        let start = Envelope::new(
                            session_id.clone(),
                            Channel::Agent,
                            EventType::TextMessageStart,
                            json!({"message_id": reply_id, "author": "AGENT", "text": format!("Echo: {text}")}),
                        );
                        let end = Envelope::new(
                            session_id.clone(),
                            Channel::Agent,
                            EventType::TextMessageEnd,
                            json!({"message_id": reply_id}),
                        );
                        let _ = handle.enqueue(start, None);
                        let _ = handle.enqueue(end, None);
                    }
                }
                _ => {}
            },
            EngineEvent::ToolCall(call_id, tool, _run_id, params) => {
                let handler = {
                    let sessions = state.sessions.lock().await;
                    let Some(session) = sessions.get(&session_id) else { continue };
                    drop(sessions);
                    let guard = session.lock().expect("session mutex poisoned");
                    guard.tools.handler_for(&tool)
                };

                match handler {
                    Some(handler) => {
                        let Some(session) = state.sessions.lock().await.get(&session_id) else { continue };
                        {
                            let mut guard = session.lock().expect("session mutex poisoned");
                            let _ = guard.tools.mark_running(&call_id);
                        }
                        let emitter = WireEmitter {
                            session_id: session_id.clone(),
                            call_id: call_id.clone(),
                            handle: handle.clone(),
                        };
                        let update = Envelope::new(
                            session_id.clone(),
                            Channel::Agent,
                            EventType::ToolUpdate,
                            json!({"call_id": call_id, "status": "RUNNING"}),
                        );
                        let _ = handle.enqueue(update, None);

                        let outcome = tokio::time::timeout(
                            tool_call_timeout,
                            handler.invoke(params, &call_id, &emitter),
                        )
                        .await;

                        let (status, result) = match outcome {
                            Ok(Ok(value)) => ("OK", value),
                            Ok(Err(message)) => ("ERROR", json!({"error": message})),
                            Err(_) => ("ERROR", json!({"error": "timeout"})),
                        };
                        let call_status = match status {
                            "OK" => CallStatus::Ok,
                            _ => CallStatus::Error,
                        };
                        {
                            let mut guard = session.lock().expect("session mutex poisoned");
                            let _ = guard.tools.finish_call(&call_id, call_status);
                        }
                        let done = Envelope::new(
                            session_id.clone(),
                            Channel::Agent,
                            EventType::ToolDone,
                            json!({"call_id": call_id, "status": status, "result": result}),
                        );
                        let _ = handle.enqueue(done, None);
                    }
                    None => {
                        let session_id = session_id.clone();
                        let state = Arc::clone(&state);
                        let handle = handle.clone();
                        let call_id = call_id.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(tool_call_timeout).await;
                            let Some(session) = state.sessions.lock().await.get(&session_id) else { return };
                            let still_pending = {
                                let guard = session.lock().expect("session mutex poisoned");
                                guard.tools.get(&call_id).map(|c| !c.status.is_terminal()).unwrap_or(false)
                            };
                            if !still_pending {
                                return;
                            }
                            {
                                let mut guard = session.lock().expect("session mutex poisoned");
                                let _ = guard.tools.finish_call(&call_id, CallStatus::Error);
                            }
                            let done = Envelope::new(
                                session_id,
                                Channel::Agent,
                                EventType::ToolDone,
                                json!({"call_id": call_id, "status": "ERROR", "result": {"error": "timeout"}}),
                            );
                            let _ = handle.enqueue(done, None);
                        });
                    }
                }
            }
            _ => {}
        }
    }
}

fn message_id_of(envelope: &Envelope) -> String {
    envelope
        .payload
        .get("message_id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Translates `UpdateEmitter::emit_update` calls from an in-process
/// [`ToolHandler`] into `TOOL_UPDATE` envelopes on the wire (spec §6.4).
struct WireEmitter {
    session_id: String,
    call_id: String,
    handle: EngineHandle,
}

#[async_trait::async_trait]
impl UpdateEmitter for WireEmitter {
    async fn emit_update(&self, status: CallStatus, progress: ToolProgress) {
        let status_str = match status {
            CallStatus::Queued => "QUEUED",
            CallStatus::Running => "RUNNING",
            CallStatus::Cancelling => "CANCELLING",
            CallStatus::Ok | CallStatus::Cancelled | CallStatus::Error => return,
        };
        let envelope = Envelope::new(
            self.session_id.clone(),
            Channel::Agent,
            EventType::ToolUpdate,
            json!({
                "call_id": self.call_id,
                "status": status_str,
                "progress": progress.progress,
                "partial": progress.partial,
            }),
        );
        let _ = self.handle.enqueue(envelope, None);
    }
}

/// `POST /haip/message`: feed one envelope into the session's already
/// running push+post engine.
async fn message_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let token = extract_bearer(&headers, None);
    if authenticate(&state, token).await.is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(session_id) = query.session else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let push_post = state.push_post.lock().await;
    let Some(transport) = push_post.get(&session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    transport.push_inbound(crate::transport::Frame::Text(body));
    StatusCode::ACCEPTED.into_response()
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: Option<String>,
    token: Option<String>,
}

/// `GET /haip/sse?token=<jwt>`: stream the session's outbound envelopes as
/// server-sent events.
async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Response {
    let token = extract_bearer(&headers, query.token.as_deref());
    if authenticate(&state, token).await.is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(session_id) = query.session else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let transport = {
        let push_post = state.push_post.lock().await;
        match push_post.get(&session_id) {
            Some(t) => Arc::clone(t),
            None => return StatusCode::NOT_FOUND.into_response(),
        }
    };
    let Some(outbound) = transport.take_outbound().await else {
        return StatusCode::CONFLICT.into_response();
    };

    let stream = build_sse_stream(outbound);
    Sse::new(stream).into_response()
}

fn build_sse_stream(
    outbound: mpsc::UnboundedReceiver<crate::transport::Frame>,
) -> impl Stream<Item = std::result::Result<SseEvent, std::convert::Infallible>> {
    let rx = Arc::new(Mutex::new(outbound));
    futures::stream::unfold(rx, |rx| async move {
        let mut guard = rx.lock().await;
        loop {
            match guard.recv().await {
                Some(crate::transport::Frame::Text(s)) => {
                    drop(guard);
                    return Some((Ok(SseEvent::default().data(s)), rx));
                }
                Some(crate::transport::Frame::Binary(_)) => continue,
                None => {
                    drop(guard);
                    return None;
                }
            }
        }
    })
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = state.sessions.lock().await;
    Json(json!({
        "sessions": sessions.len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    action: &'static str,
}

fn error_body(e: &HaipError) -> ErrorBody {
    ErrorBody {
        code: e.code(),
        message: e.to_string(),
        action: e.recommended_action(),
    }
}

/// Periodically reap expired sessions; intended to be spawned once at
/// startup alongside the router.
pub async fn reap_loop(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(state.config.heartbeat_interval());
    loop {
        interval.tick().await;
        let mut sessions = state.sessions.lock().await;
        sessions.reap_expired(state.config.replay_window_time());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenValidator;

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let state = AppState::new(Config::default(), Arc::new(StaticTokenValidator::new()));
        let response = health_handler().await;
        assert_eq!(response.0["status"], "ok");
        drop(state);
    }

    #[tokio::test]
    async fn stats_endpoint_reports_zero_sessions_initially() {
        let state = AppState::new(Config::default(), Arc::new(StaticTokenValidator::new()));
        let response = stats_handler(State(state)).await;
        assert_eq!(response.0["sessions"], 0);
    }

    #[test]
    fn bearer_header_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc123".parse().unwrap(),
        );
        assert_eq!(extract_bearer(&headers, None), Some("abc123".to_string()));
    }

    #[test]
    fn query_token_is_used_when_no_header_present() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_bearer(&headers, Some("qtoken")),
            Some("qtoken".to_string())
        );
    }

    #[test]
    fn protocol_token_subprotocol_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-websocket-protocol", "token.xyz".parse().unwrap());
        assert_eq!(extract_bearer(&headers, None), Some("xyz".to_string()));
    }
}
