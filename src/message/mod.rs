//! Message contracts, envelopes and payload codecs.
//!
//! Commands and events are both messages; the distinction is in how they're
//! routed: `send` = commands (point-to-point, exactly one handler),
//! `publish` = events (fan-out, zero or more handlers), `request` = a command
//! whose single handler answers on the caller's reply queue.
//!
//! A type declares what it is through the capability traits below, usually
//! via the derives from `courier_rust_macros`:
//!
//! ```ignore
//! #[derive(Serialize, Deserialize, BusCommand)]
//! #[bus(name = "orders.place")]
//! pub struct PlaceOrder { pub order_id: String }
//! ```

mod codec;
mod envelope;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use codec::{Codec, CodecError};
pub use envelope::{
    Envelope, CAUSATION_ID_PROPERTY, CONTENT_TYPE_PROPERTY, KIND_PROPERTY, REPLY_ERROR_PROPERTY,
    REPLY_STATUS_PROPERTY,
};

/// How a message type is routed and handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Exactly one handler, point-to-point.
    Command,
    /// Zero or more handlers, fan-out.
    Event,
    /// Exactly one handler that answers with a response.
    Request,
    /// An answer to a request; never routed to a handler.
    Reply,
}

impl MessageKind {
    /// Wire name used in envelope properties.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Event => "event",
            MessageKind::Request => "request",
            MessageKind::Reply => "reply",
        }
    }

    /// Parse a wire name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "command" => Some(MessageKind::Command),
            "event" => Some(MessageKind::Event),
            "request" => Some(MessageKind::Request),
            "reply" => Some(MessageKind::Reply),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type that can travel on the bus.
pub trait BusMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical message type name; the routing key.
    const MESSAGE_TYPE: &'static str;
    /// Routing kind.
    const KIND: MessageKind;
}

/// A message with exactly one designated handler.
pub trait BusCommand: BusMessage {}

/// A message with zero or more independent handlers.
pub trait BusEvent: BusMessage {}

/// A message whose single handler answers with `Response`.
pub trait BusRequest: BusMessage {
    /// The answer type.
    type Response: Serialize + DeserializeOwned + Send + Sync + 'static;
}
