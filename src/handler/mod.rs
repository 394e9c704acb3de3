//! Message handlers: the application code the bus dispatches to.
//!
//! A handler is a plain type that opts in per message type:
//!
//! ```ignore
//! struct PlaceOrderHandler { orders: Arc<Orders> }
//!
//! impl MessageHandler for PlaceOrderHandler {
//!     fn class_interceptors() -> Vec<ComponentKey> {
//!         vec![ComponentKey::of::<AuditInterceptor>()]
//!     }
//! }
//!
//! #[async_trait]
//! impl HandleCommand<PlaceOrder> for PlaceOrderHandler {
//!     async fn handle(&self, cmd: &PlaceOrder, ctx: &MessageContext) -> Result<(), HandlerError> {
//!         self.orders.place(&cmd.order_id)?;
//!         ctx.publish(&OrderPlaced { order_id: cmd.order_id.clone() }).await?;
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Instances come from the [`DependencyResolver`](crate::resolver::DependencyResolver),
//! one per dispatch.

mod context;
mod error;

use async_trait::async_trait;

use crate::message::{BusCommand, BusEvent, BusRequest};
use crate::resolver::ComponentKey;

pub use context::MessageContext;
pub(crate) use error::catch_panic;
pub use error::HandlerError;

/// Marker for handler types, with their class-level interceptors.
pub trait MessageHandler: Send + Sync + 'static {
    /// Interceptors applied to every message this type handles.
    fn class_interceptors() -> Vec<ComponentKey> {
        Vec::new()
    }
}

/// Handles one command type.
#[async_trait]
pub trait HandleCommand<C: BusCommand>: MessageHandler {
    /// Interceptors applied only when handling `C`.
    fn method_interceptors() -> Vec<ComponentKey> {
        Vec::new()
    }

    async fn handle(&self, command: &C, ctx: &MessageContext) -> Result<(), HandlerError>;
}

/// Handles one event type. Many handlers may subscribe to the same event.
#[async_trait]
pub trait HandleEvent<E: BusEvent>: MessageHandler {
    /// Interceptors applied only when handling `E`.
    fn method_interceptors() -> Vec<ComponentKey> {
        Vec::new()
    }

    async fn handle(&self, event: &E, ctx: &MessageContext) -> Result<(), HandlerError>;
}

/// Handles one request type and produces its response.
#[async_trait]
pub trait HandleRequest<R: BusRequest>: MessageHandler {
    /// Interceptors applied only when handling `R`.
    fn method_interceptors() -> Vec<ComponentKey> {
        Vec::new()
    }

    async fn handle(&self, request: &R, ctx: &MessageContext) -> Result<R::Response, HandlerError>;
}
