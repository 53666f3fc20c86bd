//! Bidirectional chunked HTTP transport (spec §4.8 "Bidir chunked")
//!
//! A single long-lived `POST /haip/stream` whose request body and response
//! body are both chunked. Frames are newline-delimited JSON lines; a JSON
//! envelope carrying `bin_len > 0` is immediately followed, in the same
//! byte stream, by exactly `bin_len` raw bytes before the next JSON line.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{HaipError, Result};
use crate::transport::{Frame, Transport, TransportEvent};

/// Client-side bidirectional chunked HTTP transport.
pub struct ClientBidirTransport {
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl ClientBidirTransport {
    /// Open `POST /haip/stream` against `url` with `Accept:
    /// text/event-stream` and a chunked request body fed by outbound sends.
    ///
    /// # Errors
    /// Returns [`HaipError::Http`] if the request cannot be initiated.
    pub async fn connect(url: url::Url, bearer_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let body_stream = UnboundedReceiverStream::new(outbound_rx).map(Ok::<_, std::io::Error>);
        let body = reqwest::Body::wrap_stream(body_stream);

        let mut req = http_client
            .post(url.as_str())
            .header("Accept", "text/event-stream")
            .body(body);
        if let Some(token) = &bearer_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(HaipError::Http(response.error_for_status().unwrap_err()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            let _ = event_tx.send(TransportEvent::Open);
            parse_bidir_stream(byte_stream, inbound_tx).await;
            let _ = event_tx.send(TransportEvent::Close("response stream ended".into()));
        });

        Ok(Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            event_rx: Arc::new(Mutex::new(event_rx)),
        })
    }
}

#[async_trait::async_trait]
impl Transport for ClientBidirTransport {
    async fn send(&self, frame: Frame) -> Result<()> {
        let bytes = match frame {
            Frame::Text(s) => {
                let mut line = s.into_bytes();
                line.push(b'\n');
                Bytes::from(line)
            }
            Frame::Binary(b) => b,
        };
        self.outbound_tx
            .send(bytes)
            .map_err(|e| HaipError::BinaryFrameError(format!("bidir writer closed: {e}")))
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

/// Demux a chunked bidir byte stream into alternating [`Frame::Text`]
/// (newline-delimited JSON) and [`Frame::Binary`] (raw bytes following a
/// JSON line whose `bin_len` was nonzero).
async fn parse_bidir_stream<E>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>>,
    inbound_tx: mpsc::UnboundedSender<Frame>,
) {
    let mut buffer = BytesMut::new();
    let mut awaiting_binary: Option<usize> = None;
    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(_) => break,
        };
        buffer.extend_from_slice(&chunk);

        loop {
            if let Some(n) = awaiting_binary {
                if buffer.len() < n {
                    break;
                }
                let bin = buffer.split_to(n).freeze();
                if inbound_tx.send(Frame::Binary(bin)).is_err() {
                    return;
                }
                awaiting_binary = None;
                continue;
            }

            let Some(pos) = buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line = buffer.split_to(pos + 1);
            let line = &line[..line.len() - 1];
            let line = String::from_utf8_lossy(line).trim_end_matches('\r').to_string();
            if line.is_empty() {
                continue;
            }

            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
                if let Some(bin_len) = value.get("bin_len").and_then(|v| v.as_u64()) {
                    if bin_len > 0 {
                        awaiting_binary = Some(bin_len as usize);
                    }
                }
            }

            if inbound_tx.send(Frame::Text(line)).is_err() {
                return;
            }
        }
    }
}

/// Server-side bidirectional chunked HTTP transport for one `POST
/// /haip/stream` connection. The handler hands in the request body stream at
/// construction and takes the outbound byte stream to drive the response.
pub struct ServerBidirTransport {
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl ServerBidirTransport {
    /// Spawn a task demuxing `body_stream` (the request body) into inbound
    /// frames, and prepare an outbound byte channel for the response body.
    pub fn new(
        body_stream: impl Stream<Item = std::result::Result<Bytes, axum::Error>> + Send + 'static,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            let _ = event_tx.send(TransportEvent::Open);
            parse_bidir_stream(body_stream, inbound_tx).await;
            let _ = event_tx.send(TransportEvent::Close("request body ended".into()));
        });

        Self {
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            event_rx: Arc::new(Mutex::new(event_rx)),
        }
    }

    /// Take the outbound byte receiver to drive the response body; `None` if
    /// already taken.
    pub async fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.outbound_rx.lock().await.take()
    }
}

#[async_trait::async_trait]
impl Transport for ServerBidirTransport {
    async fn send(&self, frame: Frame) -> Result<()> {
        let bytes = match frame {
            Frame::Text(s) => {
                let mut line = s.into_bytes();
                line.push(b'\n');
                Bytes::from(line)
            }
            Frame::Binary(b) => b,
        };
        self.outbound_tx
            .send(bytes)
            .map_err(|e| HaipError::BinaryFrameError(format!("bidir response closed: {e}")))
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
    async fn text_only_lines_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let body = b"{\"a\":1}\n{\"b\":2}\n".to_vec();
        let stream = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(body))]);
        parse_bidir_stream(stream, tx).await;

        match rx.try_recv().unwrap() {
            Frame::Text(s) => assert_eq!(s, r#"{"a":1}"#),
            _ => panic!("expected text"),
        }
        match rx.try_recv().unwrap() {
            Frame::Text(s) => assert_eq!(s, r#"{"b":2}"#),
            _ => panic!("expected text"),
        }
    }

    #[tokio::test]
    async fn bin_len_announcement_is_followed_by_binary_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut body = br#"{"bin_len":3}"#.to_vec();
        body.push(b'\n');
        body.extend_from_slice(b"xyz");
        let stream = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(body))]);
        parse_bidir_stream(stream, tx).await;

        match rx.try_recv().unwrap() {
            Frame::Text(s) => assert_eq!(s, r#"{"bin_len":3}"#),
            _ => panic!("expected text"),
        }
        match rx.try_recv().unwrap() {
            Frame::Binary(b) => assert_eq!(&b[..], b"xyz"),
            _ => panic!("expected binary"),
        }
    }

    #[tokio::test]
    async fn binary_frame_can_arrive_split_across_chunks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from(b"{\"bin_len\":4}\n".to_vec())),
            Ok(Bytes::from(b"ab".to_vec())),
            Ok(Bytes::from(b"cd".to_vec())),
        ]);
        parse_bidir_stream(stream, tx).await;

        let _ = rx.try_recv().unwrap();
        match rx.try_recv().unwrap() {
            Frame::Binary(b) => assert_eq!(&b[..], b"abcd"),
            _ => panic!("expected binary"),
        }
    }
}
