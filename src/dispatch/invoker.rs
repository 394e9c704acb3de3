//! Handler invocation: decode once, then run each bound handler inside its
//! interceptor chain.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::binding::{DecodedMessage, HandlerDescriptor};
use super::{DispatchError, DispatchRuntime, HandlerBinding, HandlerFailure};
use crate::handler::{HandlerError, MessageContext};
use crate::interceptor::{InterceptContext, InterceptorChain, InterceptorTier};
use crate::message::{Codec, Envelope, MessageKind, CONTENT_TYPE_PROPERTY};
use crate::resolver::{Component, ScopeGuard};
use crate::transport::Destination;

/// A handler instance and its interceptors, resolved for one dispatch.
struct Prepared<'b> {
    descriptor: &'b HandlerDescriptor,
    handler: Component,
    chain: InterceptorChain,
}

/// Runs the handlers bound to one envelope.
pub struct HandlerInvoker<'a> {
    runtime: &'a DispatchRuntime,
}

impl<'a> HandlerInvoker<'a> {
    pub fn new(runtime: &'a DispatchRuntime) -> Self {
        Self { runtime }
    }

    /// Invoke every handler in `binding` for `envelope`.
    ///
    /// Commands and requests have exactly one handler. Event handlers run
    /// concurrently and independently; their failures are aggregated.
    ///
    /// A request's response is sent only after its handler and every
    /// success hook have passed.
    pub async fn invoke(
        &self,
        envelope: &Arc<Envelope>,
        binding: &HandlerBinding,
        scope: &mut ScopeGuard,
    ) -> Result<(), DispatchError> {
        let message = self.decode(envelope, binding)?;

        if binding.handlers.is_empty() {
            debug!("no handlers bound");
            return Ok(());
        }

        let mut failures = Vec::new();
        let mut prepared = Vec::with_capacity(binding.handlers.len());
        for descriptor in &binding.handlers {
            match self.prepare(descriptor, scope) {
                Ok(ready) => prepared.push(ready),
                Err(error) => {
                    warn!(handler = descriptor.handler_name, %error, "handler resolution failed");
                    failures.push(HandlerFailure {
                        handler: descriptor.handler_name,
                        error,
                        suppressed: Vec::new(),
                    });
                }
            }
        }

        let runs = prepared
            .iter()
            .map(|ready| self.run_one(ready, envelope, &message, binding.kind()));
        let mut responses = Vec::new();
        for (ready, result) in prepared.iter().zip(join_all(runs).await) {
            match result {
                Ok(Some(payload)) => responses.push((ready.descriptor.handler_name, payload)),
                Ok(None) => {}
                Err(failure) => failures.push(failure),
            }
        }

        match binding.kind() {
            MessageKind::Event if !failures.is_empty() => {
                return Err(DispatchError::Aggregate {
                    failures,
                    handlers: binding.handlers.len(),
                })
            }
            _ => {
                if let Some(failure) = failures.pop() {
                    return Err(DispatchError::Handler(failure));
                }
            }
        }

        for (handler, payload) in responses {
            self.send_reply(envelope, payload).await.map_err(|error| {
                warn!(handler, %error, "response could not be sent");
                DispatchError::Handler(HandlerFailure {
                    handler,
                    error,
                    suppressed: Vec::new(),
                })
            })?;
        }
        Ok(())
    }

    fn decode(
        &self,
        envelope: &Envelope,
        binding: &HandlerBinding,
    ) -> Result<DecodedMessage, DispatchError> {
        let undecodable = |reason: String| DispatchError::Deserialization {
            message_type: envelope.message_type.clone(),
            reason,
        };
        let codec = match envelope.property(CONTENT_TYPE_PROPERTY) {
            Some(content_type) => {
                Codec::from_content_type(content_type).map_err(|e| undecodable(e.to_string()))?
            }
            None => self.runtime.outbound.codec(),
        };
        binding
            .decode(codec, &envelope.payload)
            .map_err(|e| undecodable(e.to_string()))
    }

    fn prepare<'b>(
        &self,
        descriptor: &'b HandlerDescriptor,
        scope: &mut ScopeGuard,
    ) -> Result<Prepared<'b>, HandlerError> {
        let resolution = |e: crate::resolver::ResolveError| HandlerError::Resolution(e.to_string());

        let handler = scope.resolve(&descriptor.handler_key).map_err(resolution)?;

        let mut chain = InterceptorChain::new();
        let tiers = [
            (InterceptorTier::Global, &self.runtime.global_interceptors),
            (InterceptorTier::Class, &descriptor.class_interceptors),
            (InterceptorTier::Method, &descriptor.method_interceptors),
        ];
        for (tier, keys) in tiers {
            for key in keys {
                let interceptor = scope.resolve_interceptor(key).map_err(resolution)?;
                chain.push(tier, key.type_name(), interceptor);
            }
        }

        Ok(Prepared {
            descriptor,
            handler,
            chain,
        })
    }

    async fn run_one(
        &self,
        ready: &Prepared<'_>,
        envelope: &Arc<Envelope>,
        message: &DecodedMessage,
        kind: MessageKind,
    ) -> Result<Option<Vec<u8>>, HandlerFailure> {
        let descriptor = ready.descriptor;
        let ctx = MessageContext::new(
            envelope.clone(),
            descriptor.handler_name,
            self.runtime.outbound.clone(),
        );
        let intercept = InterceptContext::new(
            envelope,
            &**message,
            descriptor.handler_name,
            kind,
        );

        let handler = &*ready.handler;
        let message = &**message;
        let ctx = &ctx;
        let outcome = ready
            .chain
            .run(&intercept, move || descriptor.invocation.invoke(handler, message, ctx))
            .await;

        match outcome.result {
            Ok(response) => Ok(response),
            Err(error) => {
                warn!(handler = descriptor.handler_name, %error, "handler failed");
                Err(HandlerFailure {
                    handler: descriptor.handler_name,
                    error,
                    suppressed: outcome.suppressed,
                })
            }
        }
    }

    async fn send_reply(&self, request: &Envelope, payload: Vec<u8>) -> Result<(), HandlerError> {
        let Some(reply_to) = request.reply_to.as_deref() else {
            warn!("request has no reply-to address; dropping response");
            return Ok(());
        };
        let codec = self.runtime.outbound.codec();
        let reply = request
            .reply(format!("{}.reply", request.message_type), payload)
            .with_property(CONTENT_TYPE_PROPERTY, codec.content_type());
        self.runtime
            .outbound
            .send_envelope(reply, &Destination::Queue(reply_to.to_string()))
            .await?;
        Ok(())
    }
}
