//! Duplex socket transport (spec §4.8 "Duplex socket")
//!
//! The natural mapping: a single websocket connection over which JSON text
//! frames and binary frames interleave directly, in the order the protocol
//! engine emits them. [`ServerDuplexTransport`] wraps an already-upgraded
//! `axum` websocket; [`ClientDuplexTransport`] dials out with
//! `tokio-tungstenite`.

use std::pin::Pin;
use std::sync::Arc;

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

use crate::error::{HaipError, Result};
use crate::transport::{Frame, Transport, TransportEvent};

/// Server-side duplex transport wrapping an already-upgraded `axum`
/// websocket (`GET /haip/websocket`).
pub struct ServerDuplexTransport {
    outbound_tx: mpsc::UnboundedSender<Frame>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl ServerDuplexTransport {
    /// Split `socket` into reader/writer background tasks and return a
    /// handle implementing [`Transport`].
    pub fn new(socket: WebSocket) -> Self {
        let (mut sink, mut stream) = socket.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let msg = match frame {
                    Frame::Text(s) => AxumMessage::Text(s),
                    Frame::Binary(b) => AxumMessage::Binary(b.to_vec()),
                };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let event_tx_reader = event_tx.clone();
        tokio::spawn(async move {
            let _ = event_tx_reader.send(TransportEvent::Open);
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(AxumMessage::Text(s)) => {
                        if inbound_tx.send(Frame::Text(s)).is_err() {
                            break;
                        }
                    }
                    Ok(AxumMessage::Binary(b)) => {
                        if inbound_tx.send(Frame::Binary(b.into())).is_err() {
                            break;
                        }
                    }
                    Ok(AxumMessage::Close(_)) => {
                        let _ = event_tx_reader.send(TransportEvent::Close("peer closed".into()));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx_reader.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
        });

        Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            event_rx: Arc::new(Mutex::new(event_rx)),
        }
    }
}

#[async_trait::async_trait]
impl Transport for ServerDuplexTransport {
    async fn send(&self, frame: Frame) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .map_err(|e| HaipError::BinaryFrameError(format!("duplex writer closed: {e}")))
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

/// Client-side duplex transport, dialing out via `tokio-tungstenite`.
pub struct ClientDuplexTransport {
    outbound_tx: mpsc::UnboundedSender<Frame>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl ClientDuplexTransport {
    /// Connect to `url` (e.g. `ws://host/haip/websocket?token=...`) and spawn
    /// the reader/writer background tasks.
    ///
    /// # Errors
    /// Returns [`HaipError::WebSocket`] if the initial handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let msg = match frame {
                    Frame::Text(s) => TungsteniteMessage::Text(s),
                    Frame::Binary(b) => TungsteniteMessage::Binary(b.to_vec()),
                };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let event_tx_reader = event_tx.clone();
        tokio::spawn(async move {
            let _ = event_tx_reader.send(TransportEvent::Open);
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(TungsteniteMessage::Text(s)) => {
                        if inbound_tx.send(Frame::Text(s)).is_err() {
                            break;
                        }
                    }
                    Ok(TungsteniteMessage::Binary(b)) => {
                        if inbound_tx.send(Frame::Binary(b.into())).is_err() {
                            break;
                        }
                    }
                    Ok(TungsteniteMessage::Close(_)) => {
                        let _ = event_tx_reader.send(TransportEvent::Close("peer closed".into()));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx_reader.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            event_rx: Arc::new(Mutex::new(event_rx)),
        })
    }
}

#[async_trait::async_trait]
impl Transport for ClientDuplexTransport {
    async fn send(&self, frame: Frame) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .map_err(|e| HaipError::BinaryFrameError(format!("duplex writer closed: {e}")))
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
    async fn connect_to_unreachable_url_fails() {
        let result = ClientDuplexTransport::connect("ws://127.0.0.1:1/haip/websocket").await;
        assert!(result.is_err());
    }
}
