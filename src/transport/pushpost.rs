//! Push + post transport (spec §4.8 "Push + post")
//!
//! The server-to-client direction is an SSE stream (`GET /haip/sse`), one
//! JSON envelope per `data:` event. The client-to-server direction is
//! individual HTTP POSTs (`POST /haip/handshake`, `POST /haip/message`)
//! whose bodies are the JSON envelope. In this variant the server's
//! outbound direction never carries `bin_len`; AGENT-to-USER binary bytes
//! are referenced in the envelope payload and retrieved by a separate GET,
//! so [`ClientPushPostTransport::send`] rejects [`Frame::Binary`] on the
//! generic path -- callers needing binary upload use the dedicated
//! endpoint directly, mirroring how the duplex/bidir variants keep binary
//! framing inline and this one does not.
//!
//! SSE parsing follows the same line-buffering approach as the teacher's
//! streamable-HTTP transport: accumulate bytes, split on blank lines, parse
//! `data:`/`id:`/`event:` fields per block.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{HaipError, Result};
use crate::transport::{Frame, Transport, TransportEvent};

/// Client-side push+post transport.
pub struct ClientPushPostTransport {
    http_client: reqwest::Client,
    message_url: url::Url,
    bearer_token: Option<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
    last_event_id: Arc<RwLock<Option<String>>>,
}

impl ClientPushPostTransport {
    /// Open the SSE push channel at `sse_url` and prepare to POST outbound
    /// envelopes to `message_url`.
    ///
    /// # Errors
    /// Returns [`HaipError::Http`] if the initial SSE GET fails.
    pub async fn connect(
        sse_url: url::Url,
        message_url: url::Url,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        let mut req = http_client.get(sse_url.as_str()).header("Accept", "text/event-stream");
        if let Some(token) = &bearer_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(HaipError::Http(
                response.error_for_status().unwrap_err(),
            ));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let last_event_id = Arc::new(RwLock::new(None));
        let last_event_id_task = Arc::clone(&last_event_id);

        let byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            let _ = event_tx.send(TransportEvent::Open);
            parse_sse_stream(byte_stream, inbound_tx, last_event_id_task).await;
            let _ = event_tx.send(TransportEvent::Close("sse stream ended".into()));
        });

        Ok(Self {
            http_client,
            message_url,
            bearer_token,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            event_rx: Arc::new(Mutex::new(event_rx)),
            last_event_id,
        })
    }

    /// Most recently observed SSE `id:` field, for reconnect resumption.
    pub async fn last_event_id(&self) -> Option<String> {
        self.last_event_id.read().await.clone()
    }
}

#[async_trait::async_trait]
impl Transport for ClientPushPostTransport {
    async fn send(&self, frame: Frame) -> Result<()> {
        let text = match frame {
            Frame::Text(s) => s,
            Frame::Binary(_) => {
                return Err(HaipError::BinaryFrameError(
                    "push+post client direction does not carry inline binary frames".to_string(),
                ))
            }
        };

        let mut req = self
            .http_client
            .post(self.message_url.as_str())
            .header("Content-Type", "application/json")
            .body(text);
        if let Some(token) = &self.bearer_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(HaipError::Http(response.error_for_status().unwrap_err()));
        }
        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = Frame> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>> {
        let rx = Arc::clone(&self.event_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }
}

/// Parse an SSE byte stream, forwarding each `data:` payload as
/// [`Frame::Text`]. Mirrors the teacher's streamable-HTTP SSE parser.
async fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    inbound_tx: mpsc::UnboundedSender<Frame>,
    last_event_id: Arc<RwLock<Option<String>>>,
) {
    let mut buffer = String::new();
    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(_) => break,
        };
        let text = match std::str::from_utf8(&chunk) {
            Ok(s) => s.to_string(),
            Err(_) => continue,
        };
        buffer.push_str(&text);

        while let Some(pos) = buffer.find("\n\n") {
            let event_block = buffer[..pos].to_string();
            buffer = buffer[pos + 2..].to_string();
            process_sse_event(&event_block, &inbound_tx, &last_event_id).await;
        }
    }

    if !buffer.is_empty() {
        process_sse_event(&buffer, &inbound_tx, &last_event_id).await;
    }
}

async fn process_sse_event(
    event_block: &str,
    inbound_tx: &mpsc::UnboundedSender<Frame>,
    last_event_id: &Arc<RwLock<Option<String>>>,
) {
    let mut data_lines = Vec::new();
    let mut event_id = None;

    for line in event_block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("id:") {
            event_id = Some(value.trim());
        }
    }

    if let Some(id) = event_id {
        let mut guard = last_event_id.write().await;
        *guard = Some(id.to_string());
    }

    let data = data_lines.join("\n");
    if data.is_empty() {
        return;
    }

    let _ = inbound_tx.send(Frame::Text(data));
}

/// Server-side push+post transport for one session.
///
/// The SSE GET handler drains [`Self::outbound_rx`] to build the response
/// body; the `/haip/message` POST handler calls [`Self::push_inbound`] with
/// each decoded envelope. No background task owns this transport -- both
/// sides are driven by independent HTTP request handlers sharing the
/// registered instance.
pub struct ServerPushPostTransport {
    outbound_tx: mpsc::UnboundedSender<Frame>,
    outbound_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Frame>>>>,
    inbound_tx: mpsc::UnboundedSender<Frame>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl ServerPushPostTransport {
    /// Construct a fresh transport, registered before the SSE GET arrives.
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(TransportEvent::Open);
        Self {
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(Some(outbound_rx))),
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            event_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
        }
    }

    /// Feed one envelope decoded from `POST /haip/message` into the engine's
    /// reader stream for this session.
    pub fn push_inbound(&self, frame: Frame) {
        let _ = self.inbound_tx.send(frame);
    }

    /// Take the outbound frame receiver to drive the `GET /haip/sse`
    /// response body. Returns `None` if already taken (at most one live SSE
    /// GET per session).
    pub async fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        self.outbound_rx.lock().await.take()
    }

    /// Mark the SSE stream closed, e.g. when the GET connection drops.
    pub fn mark_closed(&self, reason: impl Into<String>) {
        let _ = self.event_tx.send(TransportEvent::Close(reason.into()));
    }
}

impl Default for ServerPushPostTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for ServerPushPostTransport {
    async fn send(&self, frame: Frame) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .map_err(|e| HaipError::BinaryFrameError(format!("sse consumer gone: {e}")))
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = Frame> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>> {
        let rx = Arc::clone(&self.event_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sse_event_with_data_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let last_event_id = Arc::new(RwLock::new(None));
        let body = b"id: 1\ndata: {\"id\":\"a\"}\n\n".to_vec();
        let stream = futures::stream::iter(vec![Ok(Bytes::from(body))]);
        parse_sse_stream(stream, tx, Arc::clone(&last_event_id)).await;

        match rx.try_recv().unwrap() {
            Frame::Text(s) => assert_eq!(s, r#"{"id":"a"}"#),
            _ => panic!("expected text frame"),
        }
        assert_eq!(*last_event_id.read().await, Some("1".to_string()));
    }

    #[tokio::test]
    async fn binary_frame_send_is_rejected() {
        let transport = ClientPushPostTransport {
            http_client: reqwest::Client::new(),
            message_url: url::Url::parse("http://127.0.0.1:1/haip/message").unwrap(),
            bearer_token: None,
            inbound_rx: Arc::new(Mutex::new(mpsc::unbounded_channel().1)),
            event_rx: Arc::new(Mutex::new(mpsc::unbounded_channel().1)),
            last_event_id: Arc::new(RwLock::new(None)),
        };
        let err = transport.send(Frame::Binary(Bytes::from_static(b"x"))).await.unwrap_err();
        assert_eq!(err.code(), "BINARY_FRAME_ERROR");
    }

    #[tokio::test]
    async fn server_transport_routes_post_to_engine_and_send_to_sse() {
        let transport = ServerPushPostTransport::new();
        transport.push_inbound(Frame::Text("hello".to_string()));

        let mut inbound = transport.receive();
        match inbound.next().await.unwrap() {
            Frame::Text(s) => assert_eq!(s, "hello"),
            _ => panic!("expected text"),
        }

        transport.send(Frame::Text("world".to_string())).await.unwrap();
        let mut outbound = transport.take_outbound().await.unwrap();
        match outbound.recv().await.unwrap() {
            Frame::Text(s) => assert_eq!(s, "world"),
            _ => panic!("expected text"),
        }
        assert!(transport.take_outbound().await.is_none());
    }
}
