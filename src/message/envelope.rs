//! The inbound/outbound unit of work carried by a transport.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::MessageKind;

/// Property carrying the [`MessageKind`] of an envelope.
pub const KIND_PROPERTY: &str = "courier.kind";
/// Property carrying the payload content type (see [`Codec`](super::Codec)).
pub const CONTENT_TYPE_PROPERTY: &str = "courier.content-type";
/// Property carrying the id of the message whose handler produced this one.
pub const CAUSATION_ID_PROPERTY: &str = "courier.causation-id";
/// Property carrying `ok` or `failed` on reply envelopes.
pub const REPLY_STATUS_PROPERTY: &str = "courier.reply-status";
/// Property carrying the failure summary on failed replies.
pub const REPLY_ERROR_PROPERTY: &str = "courier.reply-error";

const REPLY_OK: &str = "ok";
const REPLY_FAILED: &str = "failed";

/// A message as seen by the transport: routing metadata plus an opaque payload.
///
/// The dispatch core only ever reads an envelope. The delivery attempt count
/// belongs to the transport, which produces a new envelope with an increased
/// count on every redelivery (see [`Envelope::redelivered`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique identifier for this message.
    pub id: String,
    /// Logical message type name (e.g. "orders.place").
    pub message_type: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
    /// Correlation id for request/response exchanges.
    pub correlation_id: Option<String>,
    /// Address replies should be sent to.
    pub reply_to: Option<String>,
    /// Arbitrary string properties (headers).
    pub properties: BTreeMap<String, String>,
    delivery_attempt: u32,
    #[serde(skip)]
    lock_token: Option<String>,
}

impl Envelope {
    /// Create a new envelope with a generated id and a delivery attempt of 1.
    pub fn new(message_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), message_type, payload)
    }

    /// Create a new envelope with an explicit id.
    pub fn with_id(
        id: impl Into<String>,
        message_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            message_type: message_type.into(),
            payload,
            correlation_id: None,
            reply_to: None,
            properties: BTreeMap::new(),
            delivery_attempt: 1,
            lock_token: None,
        }
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the reply-to address.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Tag the envelope with its message kind.
    pub fn with_kind(self, kind: MessageKind) -> Self {
        self.with_property(KIND_PROPERTY, kind.as_str())
    }

    /// Get a property value.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The kind this envelope was tagged with, if any.
    pub fn kind(&self) -> Option<MessageKind> {
        self.property(KIND_PROPERTY).and_then(MessageKind::parse)
    }

    /// Whether this envelope answers an earlier request.
    pub fn is_reply(&self) -> bool {
        self.kind() == Some(MessageKind::Reply)
    }

    /// Number of times the transport has presented this message, starting at 1.
    pub fn delivery_attempt(&self) -> u32 {
        self.delivery_attempt
    }

    /// Transport-side override of the delivery attempt count.
    pub fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = attempt.max(1);
        self
    }

    /// The copy a transport hands out when it redelivers this message.
    pub fn redelivered(&self) -> Self {
        let mut next = self.clone();
        next.delivery_attempt = self.delivery_attempt.saturating_add(1);
        next.lock_token = None;
        next
    }

    /// Lock token assigned by the transport on receive.
    pub fn lock_token(&self) -> Option<&str> {
        self.lock_token.as_deref()
    }

    /// Attach the lock token for the current delivery.
    pub fn with_lock_token(mut self, token: impl Into<String>) -> Self {
        self.lock_token = Some(token.into());
        self
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Build a successful reply to this request envelope.
    pub fn reply(&self, message_type: impl Into<String>, payload: Vec<u8>) -> Self {
        let mut reply = Envelope::new(message_type, payload)
            .with_kind(MessageKind::Reply)
            .with_property(REPLY_STATUS_PROPERTY, REPLY_OK)
            .with_property(CAUSATION_ID_PROPERTY, self.id.clone());
        reply.correlation_id = self.correlation_id.clone();
        reply
    }

    /// Build a failure reply to this request envelope.
    pub fn failure_reply(&self, reason: impl Into<String>) -> Self {
        let mut reply = Envelope::new(self.message_type.clone(), Vec::new())
            .with_kind(MessageKind::Reply)
            .with_property(REPLY_STATUS_PROPERTY, REPLY_FAILED)
            .with_property(REPLY_ERROR_PROPERTY, reason)
            .with_property(CAUSATION_ID_PROPERTY, self.id.clone());
        reply.correlation_id = self.correlation_id.clone();
        reply
    }

    /// For reply envelopes: the failure summary if the remote handler failed.
    pub fn reply_failure(&self) -> Option<&str> {
        match self.property(REPLY_STATUS_PROPERTY) {
            Some(REPLY_FAILED) => Some(self.property(REPLY_ERROR_PROPERTY).unwrap_or("request failed")),
            _ => None,
        }
    }
}
