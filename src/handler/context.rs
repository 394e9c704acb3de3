//! Context passed to message handlers.
//!
//! Carries the inbound envelope's metadata and an outbound channel so that
//! handlers can send follow-up commands and publish events. Messages sent
//! through the context carry the inbound message id as their causation id
//! and inherit its correlation id.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bus::Outbound;
use crate::error::BusError;
use crate::message::{BusCommand, BusEvent, BusMessage, Envelope, CAUSATION_ID_PROPERTY};

/// The context passed to every handler invocation.
#[derive(Clone)]
pub struct MessageContext {
    envelope: Arc<Envelope>,
    handler: &'static str,
    outbound: Outbound,
}

impl MessageContext {
    pub(crate) fn new(envelope: Arc<Envelope>, handler: &'static str, outbound: Outbound) -> Self {
        Self {
            envelope,
            handler,
            outbound,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.envelope.id
    }

    pub fn message_type(&self) -> &str {
        &self.envelope.message_type
    }

    /// 1 on first delivery, incremented on every redelivery.
    pub fn delivery_attempt(&self) -> u32 {
        self.envelope.delivery_attempt()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.envelope.correlation_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.envelope.reply_to.as_deref()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.envelope.property(key)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.envelope.properties
    }

    /// Type name of the handler this context was built for.
    pub fn handler_name(&self) -> &'static str {
        self.handler
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub(crate) fn codec(&self) -> crate::message::Codec {
        self.outbound.codec()
    }

    /// Send a follow-up command.
    pub async fn send<C: BusCommand>(&self, command: &C) -> Result<(), BusError> {
        let envelope = self.caused(command)?;
        self.outbound.send_envelope_for::<C>(envelope).await
    }

    /// Publish a follow-up event.
    pub async fn publish<E: BusEvent>(&self, event: &E) -> Result<(), BusError> {
        let envelope = self.caused(event)?;
        self.outbound.send_envelope_for::<E>(envelope).await
    }

    fn caused<M: BusMessage>(&self, message: &M) -> Result<Envelope, BusError> {
        let mut envelope = self
            .outbound
            .envelope_for(message)?
            .with_property(CAUSATION_ID_PROPERTY, self.envelope.id.clone());
        if let Some(correlation_id) = &self.envelope.correlation_id {
            envelope = envelope.with_correlation_id(correlation_id.clone());
        }
        Ok(envelope)
    }
}

impl std::fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("message_id", &self.envelope.id)
            .field("message_type", &self.envelope.message_type)
            .field("handler", &self.handler)
            .finish()
    }
}
