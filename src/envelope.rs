//! Envelope wire type and codec
//!
//! An [`Envelope`] is the JSON object framing a single protocol event (spec
//! §3, §4.1). This module defines the wire struct, the [`Channel`] and
//! [`EventType`] enums, and [`encode`]/[`decode`], which validate the
//! structural invariants the engine depends on: required fields present,
//! `id` a UUID, `seq` a decimal string, `channel` matching
//! `^[A-Za-z0-9_-]{1,128}$`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HaipError, Result};

/// The five logical channels, each with its own flow-control pools.
///
/// Not a transport: multiple channels are multiplexed over the same
/// transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "AGENT")]
    Agent,
    #[serde(rename = "SYSTEM")]
    System,
    #[serde(rename = "AUDIO_IN")]
    AudioIn,
    #[serde(rename = "AUDIO_OUT")]
    AudioOut,
}

impl Channel {
    /// All channels, in a stable order used for iterating credit pools.
    pub const ALL: [Channel; 5] = [
        Channel::User,
        Channel::Agent,
        Channel::System,
        Channel::AudioIn,
        Channel::AudioOut,
    ];

    /// The wire string for this channel, as it appears in `channel` fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::User => "USER",
            Channel::Agent => "AGENT",
            Channel::System => "SYSTEM",
            Channel::AudioIn => "AUDIO_IN",
            Channel::AudioOut => "AUDIO_OUT",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = HaipError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "USER" => Ok(Channel::User),
            "AGENT" => Ok(Channel::Agent),
            "SYSTEM" => Ok(Channel::System),
            "AUDIO_IN" => Ok(Channel::AudioIn),
            "AUDIO_OUT" => Ok(Channel::AudioOut),
            other => Err(HaipError::ProtocolViolation {
                field: format!("channel:{other}"),
            }),
        }
    }
}

/// The wire-level event catalogue (spec §6.1), dispatched on the envelope's
/// `type` field. The engine routes on this tag with exhaustive handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "HAI")]
    Hai,
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "RUN_STARTED")]
    RunStarted,
    #[serde(rename = "RUN_FINISHED")]
    RunFinished,
    #[serde(rename = "RUN_CANCEL")]
    RunCancel,
    #[serde(rename = "RUN_ERROR")]
    RunError,
    #[serde(rename = "TEXT_MESSAGE_START")]
    TextMessageStart,
    #[serde(rename = "TEXT_MESSAGE_PART")]
    TextMessagePart,
    #[serde(rename = "TEXT_MESSAGE_END")]
    TextMessageEnd,
    #[serde(rename = "AUDIO_CHUNK")]
    AudioChunk,
    #[serde(rename = "TOOL_CALL")]
    ToolCall,
    #[serde(rename = "TOOL_UPDATE")]
    ToolUpdate,
    #[serde(rename = "TOOL_DONE")]
    ToolDone,
    #[serde(rename = "TOOL_CANCEL")]
    ToolCancel,
    #[serde(rename = "TOOL_LIST")]
    ToolList,
    #[serde(rename = "TOOL_SCHEMA")]
    ToolSchema,
    #[serde(rename = "FLOW_UPDATE")]
    FlowUpdate,
    #[serde(rename = "PAUSE_CHANNEL")]
    PauseChannel,
    #[serde(rename = "RESUME_CHANNEL")]
    ResumeChannel,
    #[serde(rename = "REPLAY_REQUEST")]
    ReplayRequest,
    #[serde(rename = "ACK")]
    Ack,
    #[serde(rename = "ERROR")]
    Error,
}

impl EventType {
    /// The wire string for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Hai => "HAI",
            EventType::Ping => "PING",
            EventType::Pong => "PONG",
            EventType::RunStarted => "RUN_STARTED",
            EventType::RunFinished => "RUN_FINISHED",
            EventType::RunCancel => "RUN_CANCEL",
            EventType::RunError => "RUN_ERROR",
            EventType::TextMessageStart => "TEXT_MESSAGE_START",
            EventType::TextMessagePart => "TEXT_MESSAGE_PART",
            EventType::TextMessageEnd => "TEXT_MESSAGE_END",
            EventType::AudioChunk => "AUDIO_CHUNK",
            EventType::ToolCall => "TOOL_CALL",
            EventType::ToolUpdate => "TOOL_UPDATE",
            EventType::ToolDone => "TOOL_DONE",
            EventType::ToolCancel => "TOOL_CANCEL",
            EventType::ToolList => "TOOL_LIST",
            EventType::ToolSchema => "TOOL_SCHEMA",
            EventType::FlowUpdate => "FLOW_UPDATE",
            EventType::PauseChannel => "PAUSE_CHANNEL",
            EventType::ResumeChannel => "RESUME_CHANNEL",
            EventType::ReplayRequest => "REPLAY_REQUEST",
            EventType::Ack => "ACK",
            EventType::Error => "ERROR",
        }
    }
}

/// The message envelope (spec §3): the JSON object framing a single
/// protocol event.
///
/// `seq` and `ack` are carried as decimal strings on the wire (per spec
/// §3/§4.1) but stored here as `u64` for arithmetic convenience; (de)serialize
/// via the `seq_string`/`ack_string` helper modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message identifier (UUID string).
    pub id: String,
    /// Server-assigned session identifier.
    pub session: String,
    /// Strictly increasing per (session, direction), starting at 1.
    #[serde(with = "seq_string")]
    pub seq: u64,
    /// Highest `seq` the sender has fully processed from the peer, cumulative.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_seq_string")]
    pub ack: Option<u64>,
    /// Millisecond timestamp, sender's clock.
    pub ts: i64,
    /// Logical channel this envelope travels on.
    pub channel: Channel,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Type-specific payload.
    pub payload: serde_json::Value,
    /// Byte count of a following binary frame, when one is announced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_len: Option<u64>,
    /// Media type of the following binary frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_mime: Option<String>,
}

mod seq_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<u64>().map_err(D::Error::custom)
    }
}

mod opt_seq_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_str(&v.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        match raw {
            Some(raw) => raw.parse::<u64>().map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

impl Envelope {
    /// Construct an envelope builder for `channel`/`kind` with a fresh
    /// random `id`. Caller fills in `session`, `seq`, `ts`, and `payload`.
    pub fn new(
        session: impl Into<String>,
        channel: Channel,
        kind: EventType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session: session.into(),
            seq: 0,
            ack: None,
            ts: now_millis(),
            channel,
            kind,
            payload,
            bin_len: None,
            bin_mime: None,
        }
    }

    /// Whether this envelope announces a following binary frame (spec §3
    /// invariant: `bin_len` present implies exactly one binary frame of that
    /// length follows before any other envelope).
    pub fn expects_binary(&self) -> bool {
        self.bin_len.is_some_and(|n| n > 0)
    }
}

/// Current time in milliseconds since the Unix epoch, used to stamp
/// outbound envelopes.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Encode an envelope to a single-line JSON string.
pub fn encode(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode and structurally validate a JSON envelope string.
///
/// Rejects envelopes missing any of `id`, `session`, `seq`, `ts`, `channel`,
/// `type`, `payload` with [`HaipError::ProtocolViolation`] naming the
/// offending field; validates that `id` is a UUID and `channel` matches
/// `^[A-Za-z0-9_-]{1,128}$` (enforced structurally by [`Channel`]'s closed
/// enum plus the explicit length/charset check below, since serde already
/// rejects unknown channel strings).
pub fn decode(raw: &str) -> Result<Envelope> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let obj = value.as_object().ok_or_else(|| HaipError::ProtocolViolation {
        field: "<root>".to_string(),
    })?;

    for field in ["id", "session", "seq", "ts", "channel", "type", "payload"] {
        if !obj.contains_key(field) {
            return Err(HaipError::ProtocolViolation {
                field: field.to_string(),
            });
        }
    }

    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| HaipError::ProtocolViolation {
            field: format!("<structure>: {e}"),
        })?;

    if Uuid::parse_str(&envelope.id).is_err() {
        return Err(HaipError::ProtocolViolation {
            field: "id".to_string(),
        });
    }

    let chan = envelope.channel.as_str();
    if chan.is_empty() || chan.len() > 128 {
        return Err(HaipError::ProtocolViolation {
            field: "channel".to_string(),
        });
    }

    if let Some(bin_len) = envelope.bin_len {
        if envelope.bin_mime.is_none() && bin_len > 0 {
            return Err(HaipError::ProtocolViolation {
                field: "bin_mime".to_string(),
            });
        }
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(seq: u64) -> Envelope {
        let mut e = Envelope::new(
            "sess-1",
            Channel::User,
            EventType::TextMessageStart,
            json!({"message_id": "m1", "author": "USER"}),
        );
        e.seq = seq;
        e
    }

    #[test]
    fn round_trip_is_structurally_equal() {
        let original = sample(1);
        let raw = encode(&original).unwrap();
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.seq, original.seq);
        assert_eq!(decoded.channel, original.channel);
        assert_eq!(decoded.payload, original.payload);
    }

    #[test]
    fn seq_is_encoded_as_decimal_string() {
        let raw = encode(&sample(42)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["seq"], json!("42"));
    }

    #[test]
    fn decode_rejects_missing_required_field() {
        let raw = r#"{"id":"not-even-checked-yet","session":"s","ts":1,"channel":"USER","type":"PING","payload":{}}"#;
        let err = decode(raw).unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_VIOLATION");
    }

    #[test]
    fn decode_rejects_non_uuid_id() {
        let mut e = sample(1);
        e.id = "not-a-uuid".to_string();
        let raw = encode(&e).unwrap();
        let err = decode(&raw).unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_VIOLATION");
    }

    #[test]
    fn bin_len_without_bin_mime_is_rejected() {
        let mut e = sample(1);
        e.bin_len = Some(10);
        let raw = encode(&e).unwrap();
        assert!(decode(&raw).is_err());
    }

    #[test]
    fn expects_binary_reflects_bin_len() {
        let mut e = sample(1);
        assert!(!e.expects_binary());
        e.bin_len = Some(0);
        assert!(!e.expects_binary());
        e.bin_len = Some(5);
        assert!(e.expects_binary());
    }

    #[test]
    fn channel_round_trips_through_from_str() {
        for chan in Channel::ALL {
            let parsed: Channel = chan.as_str().parse().unwrap();
            assert_eq!(parsed, chan);
        }
        assert!("NOT_A_CHANNEL".parse::<Channel>().is_err());
    }
}
