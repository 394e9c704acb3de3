use std::sync::Arc;

use crate::error::BusError;
use crate::message::{BusMessage, Codec, CodecError, Envelope, CONTENT_TYPE_PROPERTY};
use crate::transport::{routing, Destination, Transport};

/// Encodes messages into envelopes and hands them to the transport.
///
/// Shared by the [`Bus`](super::Bus) and every
/// [`MessageContext`](crate::handler::MessageContext).
#[derive(Clone)]
pub struct Outbound {
    transport: Arc<dyn Transport>,
    codec: Codec,
}

impl Outbound {
    pub fn new(transport: Arc<dyn Transport>, codec: Codec) -> Self {
        Self { transport, codec }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Encode `message` into a fresh envelope stamped with its kind and
    /// content type.
    pub fn envelope_for<M: BusMessage>(&self, message: &M) -> Result<Envelope, CodecError> {
        let payload = self.codec.encode(message)?;
        Ok(Envelope::new(M::MESSAGE_TYPE, payload)
            .with_kind(M::KIND)
            .with_property(CONTENT_TYPE_PROPERTY, self.codec.content_type()))
    }

    /// Send an envelope to wherever messages of type `M` are routed.
    pub async fn send_envelope_for<M: BusMessage>(&self, envelope: Envelope) -> Result<(), BusError> {
        let destination =
            routing::destination_for(M::KIND, M::MESSAGE_TYPE).ok_or(BusError::UnsupportedKind {
                message_type: M::MESSAGE_TYPE.to_string(),
                kind: M::KIND,
            })?;
        self.send_envelope(envelope, &destination).await
    }

    pub async fn send_envelope(
        &self,
        envelope: Envelope,
        destination: &Destination,
    ) -> Result<(), BusError> {
        tracing::debug!(
            message_id = %envelope.id,
            message_type = %envelope.message_type,
            %destination,
            "sending"
        );
        self.transport.send(envelope, destination).await?;
        Ok(())
    }
}
