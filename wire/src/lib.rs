//! Shared event envelope and protobuf codec for the realtime chat socket.
//!
//! This crate owns the wire representation used by the `chatdeck` client and
//! by anything that speaks its protocol (test backends included). Event
//! payloads stay flexible (`serde_json::Value`) inside the envelope and are
//! encoded over protobuf for compact binary transport. File bytes ride in a
//! dedicated binary field instead of being expanded into JSON numbers.
//!
//! CORRELATION
//! ===========
//! Every client request gets a fresh envelope `id`. Server events answering
//! that request carry it back as `parent_id`, and echo the request's
//! `session_id` so the client can route them to the owning session.

pub mod payload;

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use payload::{
    BotType, ErrorNotice, ExcelAnalytics, ExcelCleaning, FileData, MessageReceived, ParseBotTypeError, Payload,
    Role, SendMessage, StreamResponse,
};

/// Error returned by the envelope codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf `WireEnvelope`.
    #[error("failed to decode protobuf envelope: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `event` integer on the wire does not map to a known [`Event`].
    #[error("invalid envelope event: {0}")]
    InvalidEvent(i32),
    /// A typed payload was requested from an envelope carrying another event.
    #[error("expected {expected} payload, envelope carries {actual}")]
    UnexpectedEvent { expected: Event, actual: Event },
    /// The JSON payload (or JSON text envelope) did not match its schema.
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Named event carried by an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// Client asks a bot something, optionally with a file.
    SendMessage,
    /// Client asks the Excel bot for sheet analytics.
    ExcelAnalytics,
    /// Client asks the Excel bot to clean a sheet.
    ExcelCleaning,
    /// One-shot, non-streaming delivery from the server.
    MessageReceived,
    /// Incremental delivery; terminated by a chunk with `is_complete`.
    StreamResponse,
    /// Server-side failure answering a request.
    Error,
}

impl Event {
    /// Event name as it appears in logs and JSON envelopes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::ExcelAnalytics => "excel_analytics",
            Self::ExcelCleaning => "excel_cleaning",
            Self::MessageReceived => "message_received",
            Self::StreamResponse => "stream_response",
            Self::Error => "error",
        }
    }

    /// Convert event into wire enum integer value.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::SendMessage => WireEvent::SendMessage as i32,
            Self::ExcelAnalytics => WireEvent::ExcelAnalytics as i32,
            Self::ExcelCleaning => WireEvent::ExcelCleaning as i32,
            Self::MessageReceived => WireEvent::MessageReceived as i32,
            Self::StreamResponse => WireEvent::StreamResponse as i32,
            Self::Error => WireEvent::Error as i32,
        }
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WireEvent::try_from(value) {
            Ok(WireEvent::SendMessage) => Ok(Self::SendMessage),
            Ok(WireEvent::ExcelAnalytics) => Ok(Self::ExcelAnalytics),
            Ok(WireEvent::ExcelCleaning) => Ok(Self::ExcelCleaning),
            Ok(WireEvent::MessageReceived) => Ok(Self::MessageReceived),
            Ok(WireEvent::StreamResponse) => Ok(Self::StreamResponse),
            Ok(WireEvent::Error) => Ok(Self::Error),
            Err(_) => Err(CodecError::InvalidEvent(value)),
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message on the realtime wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique identifier for this envelope (UUID string).
    pub id: String,
    /// ID of the client request this envelope answers, if any.
    pub parent_id: Option<String>,
    /// Milliseconds since the Unix epoch when the envelope was created.
    pub ts: i64,
    /// Client session the envelope belongs to, if any.
    pub session_id: Option<String>,
    pub event: Event,
    /// Event payload.
    pub data: Value,
    /// Binary side-channel for file bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<Vec<u8>>,
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(duration.as_millis()).unwrap_or(0)
}

impl Envelope {
    /// Create a fresh envelope for `event`.
    #[must_use]
    pub fn new(event: Event, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            ts: now_ms(),
            session_id: None,
            event,
            data,
            blob: None,
        }
    }

    /// Build an envelope from a typed payload. File bytes move into `blob`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if the payload does not serialize.
    pub fn from_payload<P: Payload>(mut payload: P) -> Result<Self, CodecError> {
        let blob = payload.take_blob();
        let data = serde_json::to_value(&payload)?;
        let mut envelope = Self::new(P::EVENT, data);
        envelope.blob = blob;
        Ok(envelope)
    }

    /// Decode the typed payload carried by this envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEvent`] when the envelope carries a
    /// different event, and [`CodecError::Payload`] when the data does not
    /// match the payload schema.
    pub fn payload<P: Payload>(&self) -> Result<P, CodecError> {
        if self.event != P::EVENT {
            return Err(CodecError::UnexpectedEvent { expected: P::EVENT, actual: self.event });
        }
        let mut payload: P = serde_json::from_value(self.data.clone())?;
        if let Some(blob) = &self.blob {
            payload.put_blob(blob.clone());
        }
        Ok(payload)
    }

    /// Build a reply answering this envelope. Inherits `session_id`.
    #[must_use]
    pub fn reply(&self, event: Event, data: Value) -> Self {
        let mut reply = Self::new(event, data);
        reply.parent_id = Some(self.id.clone());
        reply.session_id.clone_from(&self.session_id);
        reply
    }

    /// Build a typed reply answering this envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if the payload does not serialize.
    pub fn reply_with<P: Payload>(&self, payload: P) -> Result<Self, CodecError> {
        let mut reply = Self::from_payload(payload)?;
        reply.parent_id = Some(self.id.clone());
        reply.session_id.clone_from(&self.session_id);
        Ok(reply)
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Encode an envelope into protobuf bytes.
#[must_use]
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let wire = envelope_to_wire(envelope);

    let mut out = Vec::with_capacity(wire.encoded_len());
    // Encoding into a growable Vec cannot fail.
    wire.encode(&mut out).unwrap_or_default();
    out
}

/// Decode protobuf bytes into an envelope.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::InvalidEvent`] for out-of-range event values.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let wire = WireEnvelope::decode(bytes)?;
    wire_to_envelope(wire)
}

/// Decode a JSON text envelope.
///
/// # Errors
///
/// Returns [`CodecError::Payload`] when the text is not a valid envelope.
pub fn decode_json_envelope(text: &str) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_str(text)?)
}

fn envelope_to_wire(envelope: &Envelope) -> WireEnvelope {
    WireEnvelope {
        id: envelope.id.clone(),
        parent_id: envelope.parent_id.clone(),
        ts: envelope.ts,
        session_id: envelope.session_id.clone(),
        event: envelope.event.as_i32(),
        data: Some(json_to_proto_value(&envelope.data)),
        blob: envelope.blob.clone(),
    }
}

fn wire_to_envelope(wire: WireEnvelope) -> Result<Envelope, CodecError> {
    Ok(Envelope {
        id: wire.id,
        parent_id: wire.parent_id,
        ts: wire.ts,
        session_id: wire.session_id,
        event: Event::from_i32(wire.event)?,
        data: wire
            .data
            .map_or(Value::Object(Map::new()), |v| proto_to_json_value(&v)),
        blob: wire.blob,
    })
}

fn json_to_proto_value(value: &Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => prost_types::value::Kind::NullValue(prost_types::NullValue::NullValue as i32),
        Value::Bool(v) => prost_types::value::Kind::BoolValue(*v),
        Value::Number(v) => prost_types::value::Kind::NumberValue(v.as_f64().unwrap_or(0.0)),
        Value::String(v) => prost_types::value::Kind::StringValue(v.clone()),
        Value::Array(v) => prost_types::value::Kind::ListValue(prost_types::ListValue {
            values: v.iter().map(json_to_proto_value).collect(),
        }),
        Value::Object(v) => prost_types::value::Kind::StructValue(prost_types::Struct {
            fields: v
                .iter()
                .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
                .collect(),
        }),
    };

    prost_types::Value { kind: Some(kind) }
}

fn proto_to_json_value(value: &prost_types::Value) -> Value {
    let Some(kind) = &value.kind else {
        return Value::Null;
    };

    match kind {
        prost_types::value::Kind::NullValue(_) => Value::Null,
        prost_types::value::Kind::NumberValue(v) => number_value(*v),
        prost_types::value::Kind::StringValue(v) => Value::String(v.clone()),
        prost_types::value::Kind::BoolValue(v) => Value::Bool(*v),
        prost_types::value::Kind::StructValue(v) => Value::Object(
            v.fields
                .iter()
                .map(|(k, v)| (k.clone(), proto_to_json_value(v)))
                .collect(),
        ),
        prost_types::value::Kind::ListValue(v) => Value::Array(v.values.iter().map(proto_to_json_value).collect()),
    }
}

/// Protobuf numbers are always doubles; integral values come back as JSON
/// integers so integer payload fields still deserialize.
#[allow(clippy::cast_possible_truncation)]
fn number_value(v: f64) -> Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if v.fract() == 0.0 && v.abs() <= MAX_SAFE_INTEGER {
        return Value::Number(serde_json::Number::from(v as i64));
    }
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

#[derive(Clone, PartialEq, Message)]
struct WireEnvelope {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(string, optional, tag = "4")]
    session_id: Option<String>,
    #[prost(enumeration = "WireEvent", tag = "5")]
    event: i32,
    #[prost(message, optional, tag = "6")]
    data: Option<prost_types::Value>,
    #[prost(bytes = "vec", optional, tag = "7")]
    blob: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireEvent {
    SendMessage = 0,
    ExcelAnalytics = 1,
    ExcelCleaning = 2,
    MessageReceived = 3,
    StreamResponse = 4,
    Error = 5,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
