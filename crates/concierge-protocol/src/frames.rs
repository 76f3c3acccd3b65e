//! Event frames for the Concierge protocol.
//!
//! A frame is one named event plus an opaque JSON payload. The hub never
//! looks inside the payload; it only routes and encodes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Event type of the synthetic keep-alive frame.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// A single event delivered to subscribers.
///
/// Serializes to the envelope `{"event_type": ..., "payload": ...}` carried
/// in the `data` field of every wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Short identifying name, e.g. `guest_updated`.
    pub event_type: String,
    /// Publisher-supplied payload.
    pub payload: Value,
}

impl EventFrame {
    /// Create a new frame.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Create a heartbeat frame stamped with the current time.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::heartbeat_at(Utc::now())
    }

    /// Create a heartbeat frame stamped with the given time.
    #[must_use]
    pub fn heartbeat_at(timestamp: DateTime<Utc>) -> Self {
        Self::new(
            HEARTBEAT_EVENT,
            json!({ "timestamp": timestamp.to_rfc3339() }),
        )
    }

    /// Check if this is a heartbeat frame.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.event_type == HEARTBEAT_EVENT
    }
}

/// How frames are laid out on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `event:` line followed by the `data:` line. Lets browsers dispatch
    /// with `addEventListener(event_type, ...)`.
    #[default]
    Named,
    /// `data:` line only. Everything arrives on `onmessage`.
    DataOnly,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_frame_envelope_shape() {
        let frame = EventFrame::new("guest_updated", json!({"id": 42, "name": "A"}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"event_type": "guest_updated", "payload": {"id": 42, "name": "A"}})
        );
    }

    #[test]
    fn test_heartbeat_payload() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let frame = EventFrame::heartbeat_at(ts);

        assert!(frame.is_heartbeat());
        assert_eq!(frame.payload["timestamp"], "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_wire_format_names() {
        let format: WireFormat = serde_json::from_str("\"data_only\"").unwrap();
        assert_eq!(format, WireFormat::DataOnly);
        assert_eq!(WireFormat::default(), WireFormat::Named);
    }
}
