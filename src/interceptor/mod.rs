//! Inbound interceptors: hooks around every handler invocation.
//!
//! ## Pipeline
//!
//! ```text
//!   global[0] ─┐                                    ┌─ global[0]
//!    global[1] ─┤ on_handler_executing   on_handler_ ├─ global[1]
//!     class[0] ─┤   (outside → in)       success /   ├─ class[0]
//!     method[0]─┘                        error       └─ method[0]
//!                     ──────► handler ──────►   (inside → out)
//! ```
//!
//! Interceptors are resolved per dispatch from the same scope as the handler
//! and grouped in three tiers: global (every handler), class (declared by a
//! handler type) and method (declared for one message type on a handler).

mod chain;

use std::any::Any;
use std::fmt;

use async_trait::async_trait;

use crate::handler::HandlerError;
use crate::message::{Envelope, MessageKind};

pub use chain::{ChainOutcome, HookFailure, InterceptorChain};

/// Cross-cutting logic run around handler invocations.
///
/// All hooks default to doing nothing. A failing `on_handler_executing` stops
/// the handler from running; a failing `on_handler_success` turns the
/// invocation into a failure. Failures of `on_handler_error` are logged and
/// never replace the original error.
#[async_trait]
pub trait InboundInterceptor: Send + Sync + 'static {
    async fn on_handler_executing(&self, _ctx: &InterceptContext<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn on_handler_success(&self, _ctx: &InterceptContext<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn on_handler_error(
        &self,
        _ctx: &InterceptContext<'_>,
        _error: &HandlerError,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Which tier an interceptor was attached at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InterceptorTier {
    Global,
    Class,
    Method,
}

/// The three interceptor hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    Executing,
    Success,
    Error,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPoint::Executing => "on_handler_executing",
            HookPoint::Success => "on_handler_success",
            HookPoint::Error => "on_handler_error",
        })
    }
}

/// What an interceptor can see of the invocation it wraps.
pub struct InterceptContext<'a> {
    envelope: &'a Envelope,
    message: &'a (dyn Any + Send + Sync),
    handler: &'static str,
    kind: MessageKind,
}

impl<'a> InterceptContext<'a> {
    pub fn new(
        envelope: &'a Envelope,
        message: &'a (dyn Any + Send + Sync),
        handler: &'static str,
        kind: MessageKind,
    ) -> Self {
        Self {
            envelope,
            message,
            handler,
            kind,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        self.envelope
    }

    pub fn message_type(&self) -> &str {
        &self.envelope.message_type
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Type name of the handler being invoked.
    pub fn handler_name(&self) -> &'static str {
        self.handler
    }

    /// The decoded message, if it is a `T`.
    pub fn message<T: Any>(&self) -> Option<&T> {
        self.message.downcast_ref::<T>()
    }
}

impl fmt::Debug for InterceptContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptContext")
            .field("message_id", &self.envelope.id)
            .field("message_type", &self.envelope.message_type)
            .field("handler", &self.handler)
            .field("kind", &self.kind)
            .finish()
    }
}
