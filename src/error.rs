//! Error types for the HAIP engine
//!
//! This module defines the error taxonomy from the protocol specification,
//! using `thiserror` for ergonomic error handling. Every peer-visible error
//! carries a stable wire `code` (see [`HaipError::code`]) used to populate
//! the `code` field of an outbound `ERROR` envelope.

use thiserror::Error;

/// Main error type for HAIP engine operations.
///
/// Variants map directly onto the error taxonomy of the protocol
/// specification: protocol, flow, state, tool, auth, and transport families,
/// plus the usual I/O/serialization wrapping variants.
#[derive(Error, Debug)]
pub enum HaipError {
    /// A required envelope field was missing or malformed.
    #[error("protocol violation: {field}")]
    ProtocolViolation {
        /// Name of the offending field.
        field: String,
    },

    /// An inbound `seq` violated the monotonic ordering contract.
    #[error("sequence violation: expected {expected}, got {got}")]
    SeqViolation {
        /// The sequence number the tracker expected.
        expected: u64,
        /// The sequence number actually received.
        got: u64,
    },

    /// The envelope's `type` is not part of the event catalogue.
    #[error("unsupported envelope type: {0}")]
    UnsupportedType(String),

    /// The peer's `HAI` handshake named no major version we support.
    #[error("version incompatible: supported={supported:?}")]
    VersionIncompatible {
        /// Major versions this endpoint supports.
        supported: Vec<u32>,
    },

    /// A send would have driven a channel's credit pool negative, or a
    /// paused channel's buffer overflowed.
    #[error("flow control violation on channel {channel}: {reason}")]
    FlowControlViolation {
        /// Channel the violation occurred on.
        channel: String,
        /// Human-readable reason.
        reason: String,
    },

    /// `REPLAY_REQUEST.from_seq` was below the replay window floor.
    #[error("replay too old: requested from_seq={from_seq}, floor={floor}")]
    ReplayTooOld {
        /// Requested starting sequence.
        from_seq: u64,
        /// Oldest sequence still retained.
        floor: u64,
    },

    /// A resume attempt failed (unknown session, or `last_rx_seq` too old).
    #[error("resume failed for session {session}")]
    ResumeFailed {
        /// The session identifier the peer attempted to resume.
        session: String,
    },

    /// A session tried to start more concurrent runs than its configured cap.
    #[error("run limit exceeded: max={max}")]
    RunLimitExceeded {
        /// The configured `maxConcurrentRuns`.
        max: usize,
    },

    /// A message referenced a `run_id` with no matching active run.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// `TOOL_CALL` referenced a tool name not in the registry.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// A registered tool implementation raised an error while executing.
    #[error("tool execution error: {0}")]
    ToolExecutionError(String),

    /// `TOOL_CALL.params` failed structural validation against the input schema.
    #[error("tool schema violation: {0}")]
    ToolSchemaViolation(String),

    /// Bearer credential presented at connect time was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A binary frame did not match its announcing envelope's `bin_len`.
    #[error("binary frame error: {0}")]
    BinaryFrameError(String),

    /// An operation (handshake, ping, tool call) exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client failure (bidir/push transports).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket failure (duplex transport).
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl HaipError {
    /// The stable wire error code for this variant, as used in the `code`
    /// field of an outbound `ERROR` envelope (spec §7).
    pub fn code(&self) -> &'static str {
        match self {
            HaipError::ProtocolViolation { .. } => "PROTOCOL_VIOLATION",
            HaipError::SeqViolation { .. } => "SEQ_VIOLATION",
            HaipError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            HaipError::VersionIncompatible { .. } => "VERSION_INCOMPATIBLE",
            HaipError::FlowControlViolation { .. } => "FLOW_CONTROL_VIOLATION",
            HaipError::ReplayTooOld { .. } => "REPLAY_TOO_OLD",
            HaipError::ResumeFailed { .. } => "RESUME_FAILED",
            HaipError::RunLimitExceeded { .. } => "RUN_LIMIT_EXCEEDED",
            HaipError::RunNotFound(_) => "RUN_NOT_FOUND",
            HaipError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            HaipError::ToolExecutionError(_) => "TOOL_EXECUTION_ERROR",
            HaipError::ToolSchemaViolation(_) => "TOOL_SCHEMA_VIOLATION",
            HaipError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            HaipError::BinaryFrameError(_) => "BINARY_FRAME_ERROR",
            HaipError::Timeout(_) => "TIMEOUT",
            HaipError::Io(_) | HaipError::Serialization(_) => "PROTOCOL_VIOLATION",
            HaipError::Http(_) | HaipError::WebSocket(_) => "TIMEOUT",
        }
    }

    /// Whether the session may be retained for a later resume after this
    /// error closes the transport (spec §7: auth and version failures are
    /// not recoverable).
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            HaipError::AuthenticationFailed(_) | HaipError::VersionIncompatible { .. }
        )
    }

    /// The client-side recommended action for this error kind (spec §7).
    pub fn recommended_action(&self) -> &'static str {
        match self {
            HaipError::ProtocolViolation { .. }
            | HaipError::UnsupportedType(_)
            | HaipError::BinaryFrameError(_)
            | HaipError::Io(_)
            | HaipError::Serialization(_) => "retry-with-backoff",
            HaipError::SeqViolation { .. } | HaipError::ReplayTooOld { .. } => "request-replay",
            HaipError::FlowControlViolation { .. } => "await-credit",
            HaipError::AuthenticationFailed(_) => "reauthenticate",
            HaipError::VersionIncompatible { .. } => "upgrade",
            HaipError::ResumeFailed { .. } => "retry-with-backoff",
            HaipError::RunLimitExceeded { .. } | HaipError::RunNotFound(_) => "retry-with-backoff",
            HaipError::ToolNotFound(_)
            | HaipError::ToolExecutionError(_)
            | HaipError::ToolSchemaViolation(_) => "retry-with-backoff",
            HaipError::Timeout(_) | HaipError::Http(_) | HaipError::WebSocket(_) => {
                "retry-with-backoff"
            }
        }
    }
}

/// Result type alias for fallible HAIP engine operations.
pub type Result<T> = std::result::Result<T, HaipError>;
