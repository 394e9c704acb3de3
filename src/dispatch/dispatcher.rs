//! Per-envelope dispatch lifecycle.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace, warn, Instrument};

use super::{DeliveryDecision, DispatchError, DispatchRuntime, HandlerInvoker};
use crate::message::{Envelope, MessageKind};
use crate::resolver::ScopeGuard;
use crate::transport::{Destination, TransportError};

/// Lifecycle states of one dispatch, in order. No state is entered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    Received,
    Resolving,
    Invoking,
    Succeeded,
    Failed,
    Decided,
    Closed,
}

/// What happened to one envelope.
#[derive(Debug)]
pub struct DispatchReport {
    pub message_id: String,
    pub message_type: String,
    pub delivery_attempt: u32,
    pub outcome: Result<(), DispatchError>,
    pub decision: DeliveryDecision,
    /// Set when the transport refused the settlement (e.g. lock lost).
    pub settle_error: Option<TransportError>,
    /// States entered, in order.
    pub states: Vec<DispatchState>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Drives one envelope from receipt to settlement.
pub struct Dispatcher {
    runtime: Arc<DispatchRuntime>,
    cancel: CancellationToken,
    states: Vec<DispatchState>,
}

impl Dispatcher {
    /// `cancel` aborts handler invocation; the envelope is then released for
    /// redelivery instead of being completed or dead-lettered.
    pub fn new(runtime: Arc<DispatchRuntime>, cancel: CancellationToken) -> Self {
        Self {
            runtime,
            cancel,
            states: Vec::with_capacity(6),
        }
    }

    fn enter(&mut self, state: DispatchState) {
        trace!(?state, "dispatch state");
        self.states.push(state);
    }

    /// Dispatch `envelope` and settle it with the transport exactly once.
    pub async fn dispatch(self, envelope: Envelope) -> DispatchReport {
        let span = info_span!(
            "dispatch",
            message_id = %envelope.id,
            message_type = %envelope.message_type,
            attempt = envelope.delivery_attempt(),
        );
        self.run(envelope).instrument(span).await
    }

    async fn run(mut self, envelope: Envelope) -> DispatchReport {
        let runtime = self.runtime.clone();
        let envelope = Arc::new(envelope);
        let mut scope = ScopeGuard::empty();

        self.enter(DispatchState::Received);
        self.enter(DispatchState::Resolving);

        let binding = runtime.bindings.get(&envelope.message_type);
        let outcome = match binding {
            None => Err(DispatchError::Routing(envelope.message_type.clone())),
            Some(binding) => {
                self.enter(DispatchState::Invoking);
                scope = ScopeGuard::new(runtime.resolver.begin_scope());
                let invoker = HandlerInvoker::new(&runtime);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(DispatchError::Cancelled),
                    result = invoker.invoke(&envelope, binding, &mut scope) => result,
                }
            }
        };

        match &outcome {
            Ok(()) => self.enter(DispatchState::Succeeded),
            Err(err) => {
                warn!(error = %err, "dispatch failed");
                self.enter(DispatchState::Failed);
            }
        }

        let decision = runtime.policy.decide(&outcome, envelope.delivery_attempt());
        debug!(?decision, "delivery decided");
        self.enter(DispatchState::Decided);

        let settle_error = self.settle(&envelope, &decision).await.err();

        let is_request = binding.map(|b| b.kind()) == Some(MessageKind::Request);
        if is_request {
            if let DeliveryDecision::DeadLetter(reason) = &decision {
                self.reply_failure(&envelope, reason).await;
            }
        }

        scope.release();
        self.enter(DispatchState::Closed);

        DispatchReport {
            message_id: envelope.id.clone(),
            message_type: envelope.message_type.clone(),
            delivery_attempt: envelope.delivery_attempt(),
            outcome,
            decision,
            settle_error,
            states: self.states,
        }
    }

    async fn settle(
        &self,
        envelope: &Envelope,
        decision: &DeliveryDecision,
    ) -> Result<(), TransportError> {
        let transport = self.runtime.transport();
        let settled = match decision {
            DeliveryDecision::Complete => transport.complete(envelope).await,
            DeliveryDecision::RetryAfter(delay) if delay.is_zero() => {
                transport.abandon(envelope).await
            }
            DeliveryDecision::RetryAfter(delay) => {
                transport.schedule_redelivery(envelope, *delay).await
            }
            DeliveryDecision::DeadLetter(reason) => {
                warn!(%reason, "dead-lettering");
                transport.dead_letter(envelope, reason).await
            }
        };
        if let Err(err) = &settled {
            error!(error = %err, ?decision, "settlement failed");
        }
        settled
    }

    async fn reply_failure(&self, request: &Envelope, reason: &str) {
        let Some(reply_to) = request.reply_to.as_deref() else {
            return;
        };
        let reply = request.failure_reply(reason);
        if let Err(err) = self
            .runtime
            .outbound
            .send_envelope(reply, &Destination::Queue(reply_to.to_string()))
            .await
        {
            error!(error = %err, "failed to send failure reply");
        }
    }
}
