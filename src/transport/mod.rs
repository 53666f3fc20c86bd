//! Transport adapter abstraction (spec §4.8)
//!
//! The engine relies on a single contract regardless of wire variant: a
//! bidirectional stream of [`Frame`]s, in order, with notification on open,
//! close, and error. Concrete implementations live in submodules:
//!
//! - [`duplex`] -- natural websocket mapping; JSON and binary frames
//!   interleave directly.
//! - [`bidir`] -- a single long-lived chunked HTTP POST carrying
//!   newline-delimited JSON lines and raw binary chunks.
//! - [`pushpost`] -- SSE push channel plus per-message HTTP POST; binary
//!   payloads are out-of-band (spec §4.8 push+post note).
//!
//! This mirrors the shape of an MCP-style `Transport` trait: `send`/`receive`
//! over owned channels, framing and reconnection left to each
//! implementation.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::error::Result;

/// A single frame crossing the transport in either direction.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A JSON envelope, already encoded to its wire string.
    Text(String),
    /// An opaque binary payload, immediately following the JSON envelope
    /// that announced it via `bin_len`.
    Binary(Bytes),
}

/// A transport-level lifecycle notification, surfaced to the engine (spec
/// §4.9 publishes these onward as `connect`/`disconnect`/`error`).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport is open and ready to exchange frames.
    Open,
    /// The transport closed, with a human-readable reason.
    Close(String),
    /// A transport-level error occurred; the transport may or may not still
    /// be usable afterward.
    Error(String),
}

/// Abstraction over HAIP transport implementations.
///
/// All methods are `async` or return pinned [`Stream`]s so implementations
/// can drive I/O without blocking the executor.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send a single frame to the peer, in order relative to prior sends.
    ///
    /// # Errors
    /// Returns an error if the underlying I/O operation fails.
    async fn send(&self, frame: Frame) -> Result<()>;

    /// A stream of inbound frames, in the order received.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = Frame> + Send + '_>>;

    /// A stream of transport lifecycle events (open/close/error).
    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>>;
}

pub mod bidir;
pub mod duplex;
pub mod pushpost;
