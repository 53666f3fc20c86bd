//! Client façade (spec §6.2, §9 scenario 1)
//!
//! Dials one of the three transport variants, performs the `HAI` handshake,
//! and hands back a handle for sending envelopes and observing engine
//! events. Each variant's handshake mechanics differ (inline on the
//! connection for duplex/bidir, a dedicated `POST /haip/handshake` for
//! push+post) but all converge on the same [`HaipClient`] surface.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::{self, EngineEvent, EngineHandle};
use crate::envelope::{self, Channel, Envelope, EventType};
use crate::error::{HaipError, Result};
use crate::session::{HaiPayload, Session};
use crate::transport::bidir::ClientBidirTransport;
use crate::transport::duplex::ClientDuplexTransport;
use crate::transport::pushpost::ClientPushPostTransport;
use crate::transport::{Frame, Transport};

/// A connected HAIP client session, regardless of transport variant.
pub struct HaipClient {
    handle: EngineHandle,
    event_rx: mpsc::UnboundedReceiver<EngineEvent>,
    session: Arc<Mutex<Session>>,
}

impl HaipClient {
    /// Dial `url` (e.g. `ws://host/haip/websocket?token=...`) as a duplex
    /// socket and complete the `HAI` handshake inline on the connection.
    pub async fn connect_duplex(
        url: &str,
        accept_events: Vec<String>,
        config: &Config,
    ) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(ClientDuplexTransport::connect(url).await?);
        Self::handshake(transport, accept_events, config).await
    }

    /// Open `POST /haip/stream` as a bidirectional chunked transport and
    /// complete the `HAI` handshake inline on the connection.
    pub async fn connect_bidir(
        url: url::Url,
        bearer_token: Option<String>,
        accept_events: Vec<String>,
        config: &Config,
        timeout: Duration,
    ) -> Result<Self> {
        let transport: Arc<dyn Transport> =
            Arc::new(ClientBidirTransport::connect(url, bearer_token, timeout).await?);
        Self::handshake(transport, accept_events, config).await
    }

    /// Open the push+post transport: `POST /haip/handshake` to negotiate the
    /// session, then `GET /haip/sse` for server-to-client frames with
    /// `POST /haip/message` for client-to-server frames.
    pub async fn connect_pushpost(
        handshake_url: url::Url,
        sse_url_base: url::Url,
        message_url_base: url::Url,
        bearer_token: Option<String>,
        accept_events: Vec<String>,
        config: &Config,
        timeout: Duration,
    ) -> Result<Self> {
        let session = Session::bootstrap(accept_events, config);
        let hai = hai_envelope(&session);

        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        let mut req = http_client
            .post(handshake_url.as_str())
            .header("Content-Type", "application/json")
            .body(envelope::encode(&hai)?);
        if let Some(token) = &bearer_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(HaipError::Http(response.error_for_status().unwrap_err()));
        }
        let body: serde_json::Value = response.json().await?;
        let session_id = body
            .get("session")
            .and_then(Value::as_str)
            .ok_or_else(|| HaipError::ProtocolViolation {
                field: "session".to_string(),
            })?
            .to_string();

        let mut sse_url = sse_url_base;
        sse_url.query_pairs_mut().append_pair("session", &session_id);
        if let Some(token) = &bearer_token {
            sse_url.query_pairs_mut().append_pair("token", token);
        }
        let mut message_url = message_url_base;
        message_url.query_pairs_mut().append_pair("session", &session_id);

        let transport = ClientPushPostTransport::connect(sse_url, message_url, bearer_token, timeout).await?;

        let mut session = session;
        session.id = session_id;
        let session = Arc::new(Mutex::new(session));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = engine::spawn(
            Arc::clone(&session),
            Arc::new(transport),
            event_tx,
            config.heartbeat_interval(),
            config.heartbeat_timeout(),
        );

        Ok(Self {
            handle,
            event_rx,
            session,
        })
    }

    async fn handshake(
        transport: Arc<dyn Transport>,
        accept_events: Vec<String>,
        config: &Config,
    ) -> Result<Self> {
        let session = Session::bootstrap(accept_events, config);
        let hai = hai_envelope(&session);
        transport.send(Frame::Text(envelope::encode(&hai)?)).await?;

        use futures::StreamExt;
        let mut frames = transport.receive();
        let Some(Frame::Text(raw)) = frames.next().await else {
            return Err(HaipError::Timeout("no handshake reply received".to_string()));
        };
        let reply = envelope::decode(&raw)?;
        drop(frames);

        let mut session = session;
        session.id = reply.session.clone();
        session.inbound.receive(reply);
        let session = Arc::new(Mutex::new(session));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = engine::spawn(
            Arc::clone(&session),
            transport,
            event_tx,
            config.heartbeat_interval(),
            config.heartbeat_timeout(),
        );

        Ok(Self {
            handle,
            event_rx,
            session,
        })
    }

    /// The server-assigned session identifier, known once the handshake
    /// completes.
    pub fn session_id(&self) -> String {
        self.session.lock().expect("session mutex poisoned").id.clone()
    }

    /// Build and enqueue an envelope on `channel`, stamping it with this
    /// client's session id; `seq`/`ack` are assigned by the writer task.
    pub fn send(&self, channel: Channel, kind: EventType, payload: Value, binary: Option<Bytes>) -> Result<()> {
        let envelope = Envelope::new(self.session_id(), channel, kind, payload);
        self.handle.enqueue(envelope, binary)
    }

    /// Await the next observable engine event.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.event_rx.recv().await
    }
}

fn hai_envelope(session: &Session) -> Envelope {
    let payload = HaiPayload {
        haip_version: "1.1.2".to_string(),
        accept_major: vec![crate::session::HAIP_MAJOR_VERSION],
        accept_events: session.accept_events.clone(),
        capabilities: Some(json!({
            "flow_control": {"initial_credit_messages": 32, "initial_credit_bytes": 262_144},
        })),
        last_rx_seq: None,
    };
    Envelope::new(
        session.id.clone(),
        Channel::System,
        EventType::Hai,
        serde_json::to_value(payload).expect("HaiPayload always serializes"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_duplex_to_unreachable_url_fails() {
        let config = Config::default();
        let result = HaipClient::connect_duplex("ws://127.0.0.1:1/haip/websocket", vec![], &config).await;
        assert!(result.is_err());
    }

    #[test]
    fn hai_envelope_carries_negotiated_capabilities() {
        let config = Config::default();
        let session = Session::bootstrap(vec!["TEXT_MESSAGE_START".to_string()], &config);
        let envelope = hai_envelope(&session);
        assert_eq!(envelope.kind, EventType::Hai);
        assert_eq!(envelope.payload["haip_version"], "1.1.2");
        assert_eq!(envelope.payload["capabilities"]["flow_control"]["initial_credit_messages"], 32);
    }
}
