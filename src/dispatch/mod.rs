//! Inbound dispatch: from a received envelope to a settled one.
//!
//! ## Architecture
//!
//! ```text
//!   Transport ──receive──► DispatchLoop (one per source, K permits)
//!                               │
//!                 reply? ───────┼──────► RequestCorrelator::fulfill
//!                               ▼
//!                          Dispatcher  Received → Resolving → Invoking
//!                               │        → Succeeded/Failed → Decided → Closed
//!                               ▼
//!                         HandlerInvoker ──► InterceptorChain ──► handler(s)
//!                               │
//!                               ▼
//!                         DeliveryPolicy ──► complete / redeliver / dead-letter
//! ```
//!
//! Handler bindings are computed once at startup and are read-only while
//! loops run. Each dispatch opens its own resolution scope.

mod binding;
mod correlator;
mod dispatch_loop;
mod dispatcher;
mod invoker;
mod policy;

use std::sync::Arc;

use thiserror::Error;

use crate::bus::Outbound;
use crate::handler::HandlerError;
use crate::interceptor::HookFailure;
use crate::resolver::{ComponentKey, DependencyResolver};
use crate::transport::Transport;

pub use binding::{HandlerBinding, HandlerBindings, HandlerRegistry};
pub use correlator::{CorrelationError, PendingReply, RequestCorrelator};
pub use dispatch_loop::{DispatchLoop, LoopHandle, LoopStats};
pub use dispatcher::{DispatchReport, DispatchState, Dispatcher};
pub use invoker::HandlerInvoker;
pub use policy::{
    decide, ConstantBackoff, DeliveryDecision, DeliveryPolicy, ExponentialBackoff, RetryBackoff,
};

/// One handler's failure within a dispatch.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    /// Handler type name.
    pub handler: &'static str,
    pub error: HandlerError,
    /// Error hook failures logged while this failure was reported.
    pub suppressed: Vec<HookFailure>,
}

/// Why a dispatch did not succeed.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// No binding exists for the message type.
    #[error("no handler bound for message type `{0}`")]
    Routing(String),
    /// The payload does not decode into the bound message type.
    #[error("cannot decode `{message_type}`: {reason}")]
    Deserialization { message_type: String, reason: String },
    /// The single command or request handler failed.
    #[error("handler `{}` failed: {}", .0.handler, .0.error)]
    Handler(HandlerFailure),
    /// One or more event handlers failed.
    #[error("{} of {handlers} event handlers failed", .failures.len())]
    Aggregate {
        failures: Vec<HandlerFailure>,
        handlers: usize,
    },
    /// Shutdown cancelled the dispatch before it finished.
    #[error("dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    /// One-line description used as the dead-letter reason.
    pub fn summary(&self) -> String {
        match self {
            DispatchError::Aggregate { failures, handlers } => {
                let details: Vec<String> = failures
                    .iter()
                    .map(|failure| format!("{}: {}", failure.handler, failure.error))
                    .collect();
                format!(
                    "{} of {handlers} event handlers failed: {}",
                    failures.len(),
                    details.join("; ")
                )
            }
            other => other.to_string(),
        }
    }

    /// Every handler failure carried by this error.
    pub fn handler_failures(&self) -> &[HandlerFailure] {
        match self {
            DispatchError::Handler(failure) => std::slice::from_ref(failure),
            DispatchError::Aggregate { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Everything a dispatch needs, shared by all loops of one bus.
pub struct DispatchRuntime {
    pub(crate) bindings: HandlerBindings,
    pub(crate) resolver: Arc<dyn DependencyResolver>,
    pub(crate) outbound: Outbound,
    pub(crate) policy: DeliveryPolicy,
    pub(crate) global_interceptors: Vec<ComponentKey>,
    pub(crate) correlator: Arc<RequestCorrelator>,
}

impl DispatchRuntime {
    pub fn new(
        bindings: HandlerBindings,
        resolver: Arc<dyn DependencyResolver>,
        outbound: Outbound,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            bindings,
            resolver,
            outbound,
            policy,
            global_interceptors: Vec::new(),
            correlator: Arc::new(RequestCorrelator::new()),
        }
    }

    /// Interceptors wrapped around every handler, outermost first.
    pub fn with_global_interceptors(mut self, interceptors: Vec<ComponentKey>) -> Self {
        self.global_interceptors = interceptors;
        self
    }

    pub fn bindings(&self) -> &HandlerBindings {
        &self.bindings
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        self.outbound.transport()
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }
}
