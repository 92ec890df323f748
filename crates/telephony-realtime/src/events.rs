//! Wire format of the telephony event channel
//!
//! Every inbound frame is a UTF-8 JSON object wrapped in an envelope:
//!
//! ```text
//! { "type": "incoming_call" | "call_status_changed" | "new_call_record" | ...,
//!   "payload": { ...type-specific fields... } }
//! ```
//!
//! [`decode_frame`] turns one frame into a [`TelephonyEvent`]. Types the client
//! does not know decode to [`TelephonyEvent::Unknown`] so that event types added
//! on the server never break older clients.
//!
//! # Examples
//!
//! ```rust
//! use crm_telephony_realtime::events::{decode_frame, TelephonyEvent};
//!
//! let frame = r#"{"type":"new_call_record","payload":{"call_id":"c42"}}"#;
//! match decode_frame(frame).unwrap() {
//!     TelephonyEvent::NewCallRecord { call_id } => assert_eq!(call_id, "c42"),
//!     other => panic!("unexpected event: {:?}", other),
//! }
//! ```

use crate::error::{RealtimeError, RealtimeResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Envelope type tag of an incoming call notification
pub const INCOMING_CALL: &str = "incoming_call";
/// Envelope type tag of a call status change
pub const CALL_STATUS_CHANGED: &str = "call_status_changed";
/// Envelope type tag of a new call history record
pub const NEW_CALL_RECORD: &str = "new_call_record";
/// Envelope type tag of the server's handshake acknowledgement
pub const CONNECTED: &str = "connected";
/// Envelope type tag of a heartbeat reply
pub const PONG: &str = "pong";
/// Envelope type tag of a heartbeat request
pub const PING: &str = "ping";

/// Raw `{type, payload}` wrapper around every inbound event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type tag
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload, `null` when absent
    #[serde(default)]
    pub payload: Value,
    /// Top-level fields outside `type`/`payload` (the `connected` ack carries `user_id` here)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A call ringing on one of the user's lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingCallEvent {
    /// Call identifier assigned by the telephony provider
    pub call_id: String,
    /// Originating number
    pub from_number: String,
    /// Destination number
    pub to_number: String,
    /// Unix timestamp of the event in seconds, possibly fractional
    #[serde(serialize_with = "number::serialize")]
    pub timestamp: f64,
}

/// Status of a call as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Call is ringing
    Ringing,
    /// Call was answered
    Answered,
    /// Call ended normally
    Ended,
    /// Call failed
    Failed,
}

impl CallStatus {
    /// Whether no further status changes follow for this call
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Failed)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Ended => "ended",
            CallStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call changed status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStatusEvent {
    /// Call identifier
    pub call_id: String,
    /// New status
    pub status: CallStatus,
    /// Duration in seconds, only sent for answered/ended calls
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "number::serialize_option"
    )]
    pub duration: Option<f64>,
}

// Servers send either integers or floats; whole values go back out as integers.
mod number {
    use serde::Serializer;

    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.fract() == 0.0 && value.abs() < MAX_EXACT {
            serializer.serialize_i64(*value as i64)
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn serialize_option<S: Serializer>(
        value: &Option<f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewCallRecordPayload {
    call_id: String,
}

/// Decoded inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyEvent {
    /// Incoming call notification
    IncomingCall(IncomingCallEvent),
    /// Call status change
    CallStatusChanged(CallStatusEvent),
    /// A new record landed in the call history
    NewCallRecord {
        /// Call identifier of the new record
        call_id: String,
    },
    /// Server acknowledged the subscription
    Connected {
        /// User the server bound the channel to
        user_id: Option<String>,
    },
    /// Reply to a heartbeat ping
    Pong,
    /// Event type this client does not know
    Unknown {
        /// The unrecognized type tag
        kind: String,
    },
}

impl TelephonyEvent {
    /// Envelope type tag of the event
    pub fn kind(&self) -> &str {
        match self {
            TelephonyEvent::IncomingCall(_) => INCOMING_CALL,
            TelephonyEvent::CallStatusChanged(_) => CALL_STATUS_CHANGED,
            TelephonyEvent::NewCallRecord { .. } => NEW_CALL_RECORD,
            TelephonyEvent::Connected { .. } => CONNECTED,
            TelephonyEvent::Pong => PONG,
            TelephonyEvent::Unknown { kind } => kind,
        }
    }

    /// Call the event refers to, if any
    pub fn call_id(&self) -> Option<&str> {
        match self {
            TelephonyEvent::IncomingCall(event) => Some(&event.call_id),
            TelephonyEvent::CallStatusChanged(event) => Some(&event.call_id),
            TelephonyEvent::NewCallRecord { call_id } => Some(call_id),
            _ => None,
        }
    }
}

impl TryFrom<Envelope> for TelephonyEvent {
    type Error = RealtimeError;

    fn try_from(envelope: Envelope) -> RealtimeResult<Self> {
        let Envelope {
            kind,
            payload,
            extra,
        } = envelope;

        let event = match kind.as_str() {
            INCOMING_CALL => TelephonyEvent::IncomingCall(payload_as(&kind, payload)?),
            CALL_STATUS_CHANGED => TelephonyEvent::CallStatusChanged(payload_as(&kind, payload)?),
            NEW_CALL_RECORD => {
                let record: NewCallRecordPayload = payload_as(&kind, payload)?;
                TelephonyEvent::NewCallRecord {
                    call_id: record.call_id,
                }
            }
            CONNECTED => TelephonyEvent::Connected {
                user_id: extra.get("user_id").and_then(value_as_id),
            },
            PONG => TelephonyEvent::Pong,
            _ => TelephonyEvent::Unknown { kind },
        };
        Ok(event)
    }
}

fn payload_as<T: serde::de::DeserializeOwned>(kind: &str, payload: Value) -> RealtimeResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| RealtimeError::malformed(format!("invalid {} payload: {}", kind, e)))
}

// The server sends user ids as strings, but older builds sent integers.
fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decode one text frame into an event
pub fn decode_frame(text: &str) -> RealtimeResult<TelephonyEvent> {
    let envelope: Envelope = serde_json::from_str(text)?;
    TelephonyEvent::try_from(envelope)
}

/// Decode one binary frame, which must hold UTF-8 JSON
pub fn decode_binary_frame(data: &[u8]) -> RealtimeResult<TelephonyEvent> {
    let text = std::str::from_utf8(data)
        .map_err(|e| RealtimeError::malformed(format!("binary frame is not UTF-8: {}", e)))?;
    decode_frame(text)
}

/// Heartbeat frame sent while the channel is open
pub fn encode_ping() -> String {
    serde_json::json!({ "type": PING }).to_string()
}
