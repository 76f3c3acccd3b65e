//! # concierge-protocol
//!
//! Wire format for the Concierge real-time update hub.
//!
//! Every notification travels to subscribers as one Server-Sent Events block
//! whose `data` field carries a JSON envelope:
//!
//! ```text
//! event: guest_updated
//! data: {"event_type":"guest_updated","payload":{"id":42,"name":"A"}}
//!
//! ```
//!
//! ## Example
//!
//! ```rust
//! use concierge_protocol::{codec, EventFrame, WireFormat};
//! use serde_json::json;
//!
//! let frame = EventFrame::new("rooms_updated", json!({"rooms": []}));
//!
//! let encoded = codec::encode(&frame, WireFormat::Named).unwrap();
//! let decoded = codec::decode(std::str::from_utf8(&encoded).unwrap()).unwrap();
//! assert_eq!(decoded, frame);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, encode_heartbeat, FrameDecoder, ProtocolError, CONTENT_TYPE};
pub use frames::{EventFrame, WireFormat, HEARTBEAT_EVENT};
