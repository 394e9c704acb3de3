//! Message-dispatch engine for pub/sub service buses.
//!
//! Commands go to exactly one handler, events fan out to any number of
//! handlers, and requests are answered on the caller's private reply queue.
//! Every handler invocation runs inside an interceptor pipeline, every
//! failure goes through a bounded-retry delivery policy, and every source is
//! consumed by a competing-consumer dispatch loop with bounded concurrency.

extern crate self as courier_rust;

pub mod bus;
pub mod config;
pub mod dispatch;
mod error;
pub mod handler;
#[cfg(feature = "http")]
pub mod http;
pub mod interceptor;
pub mod message;
pub mod resolver;
pub mod telemetry;
pub mod transport;

pub use bus::{Bus, BusBuilder};
pub use config::{BackoffConfig, BusConfig};
pub use dispatch::{
    DeliveryDecision, DeliveryPolicy, DispatchError, DispatchReport, DispatchRuntime,
    Dispatcher, HandlerRegistry, LoopStats,
};
pub use error::{BusError, ConfigurationError};
pub use handler::{
    HandleCommand, HandleEvent, HandleRequest, HandlerError, MessageContext, MessageHandler,
};
pub use interceptor::{InboundInterceptor, InterceptContext};
pub use message::{BusCommand, BusEvent, BusMessage, BusRequest, Codec, Envelope, MessageKind};
pub use resolver::{ComponentKey, ComponentRegistry, DependencyResolver};
pub use transport::{Destination, InMemoryTransport, Source, Transport};

// Derives share their names with the traits they implement.
pub use courier_rust_macros::{BusCommand, BusEvent, BusRequest};

// Re-exported for handler implementations.
pub use async_trait::async_trait;
