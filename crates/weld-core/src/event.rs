//! The application-level message format.
//!
//! Every WebSocket text or binary payload is UTF-8 JSON of the shape
//! `{"event": "<name>", "data": { … }}`. Nothing else crosses the wire;
//! `connect` and `disconnect` are server-internal and never serialized.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ProtocolError, ProtocolResult};

/// Event name of server-originated error payloads.
pub const ERROR_EVENT: &str = "error";

/// Internal name of the connection-established special event.
pub const CONNECT_EVENT: &str = "connect";

/// Internal name of the connection-closed special event.
pub const DISCONNECT_EVENT: &str = "disconnect";

/// A single application message: an event name plus a JSON object payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// The event name, matching `^[A-Za-z0-9._-]+$`.
    pub event: String,
    /// The payload. Always a JSON object.
    pub data: Value,
}

impl EventMessage {
    /// Creates a message without validating the event name. Intended for
    /// server-originated messages whose names are compile-time constants.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parses and validates an inbound payload.
    ///
    /// Enforces the full wire contract: valid UTF-8 JSON, exactly the
    /// `event` and `data` keys, a well-formed event name, and an object
    /// payload.
    pub fn parse(raw: &[u8]) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ProtocolError::InvalidPayload(format!("not valid JSON: {e}")))?;

        let obj = value
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidPayload("payload is not an object".into()))?;

        for key in obj.keys() {
            if key != "event" && key != "data" {
                return Err(ProtocolError::InvalidPayload(format!(
                    "unexpected top-level key '{key}'"
                )));
            }
        }

        let event = obj
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidPayload("missing 'event' string".into()))?;
        if !is_valid_event_name(event) {
            return Err(ProtocolError::InvalidPayload(format!(
                "invalid event name '{event}'"
            )));
        }

        let data = obj
            .get("data")
            .ok_or_else(|| ProtocolError::InvalidPayload("missing 'data' object".into()))?;
        if !data.is_object() {
            return Err(ProtocolError::InvalidPayload("'data' is not an object".into()));
        }

        Ok(Self {
            event: event.to_string(),
            data: data.clone(),
        })
    }

    /// Serializes the message to its wire form.
    pub fn to_wire(&self) -> String {
        // Two keys of plain JSON; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Builds the in-band error payload sent back to a misbehaving or
/// unlucky peer: `{"event":"error","data":{"message":..,"timestamp":..}}`.
pub fn error_event(message: impl Into<String>) -> EventMessage {
    EventMessage::new(
        ERROR_EVENT,
        json!({
            "message": message.into(),
            "timestamp": unix_timestamp(),
        }),
    )
}

/// Checks an event name against `^[A-Za-z0-9._-]+$`.
pub fn is_valid_event_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

/// Seconds since the Unix epoch.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
