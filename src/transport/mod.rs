//! Transport collaborator: the message broker seen from the dispatch core.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Bus / Dispatch Loops                        │
//! │  - send() / publish() / request()                            │
//! │  - receive() → dispatch → complete / abandon / dead-letter   │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Transport trait                          │
//! │  receive(source) / complete / abandon / schedule_redelivery  │
//! │  dead_letter / send(envelope, destination)                   │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌──────────────────┐  ┌─────────────┐    ┌─────────────────────┐
//! │InMemoryTransport │  │ ServiceBus  │    │ RabbitMq / Kafka    │
//! │   (included)     │  │ (external)  │    │    (external)       │
//! └──────────────────┘  └─────────────┘    └─────────────────────┘
//! ```
//!
//! The transport owns lock/lease semantics: a received envelope is held by
//! exactly one receiver until it is settled (completed, abandoned, scheduled
//! for redelivery or dead-lettered). It also owns the delivery attempt count.

mod in_memory;
pub mod routing;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Envelope;

pub use in_memory::{DeadLetter, InMemoryTransport, Settlement};

/// Where outbound envelopes go.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Point-to-point queue; one consumer per message.
    Queue(String),
    /// Fan-out topic; every subscription receives a copy.
    Topic(String),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "queue:{name}"),
            Destination::Topic(name) => write!(f, "topic:{name}"),
        }
    }
}

/// Where a dispatch loop pulls envelopes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// A queue; every consumer competes for its messages.
    Queue(String),
    /// A named subscription on a topic; consumers of the same subscription compete.
    Subscription {
        /// Topic name.
        topic: String,
        /// Subscription name.
        subscription: String,
    },
}

impl Source {
    /// Broker path of the entity messages are drawn from.
    pub fn path(&self) -> String {
        match self {
            Source::Queue(name) => name.clone(),
            Source::Subscription {
                topic,
                subscription,
            } => format!("{topic}/subscriptions/{subscription}"),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Error type for transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The lock on a received message expired or it was already settled.
    #[error("lock lost for message {message_id}")]
    LockLost {
        /// Id of the message whose lock is gone.
        message_id: String,
    },
    /// The source does not exist on the broker.
    #[error("unknown source: {0}")]
    UnknownSource(String),
    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
    /// Backend-specific failure.
    #[error("transport backend error: {0}")]
    Backend(String),
}

/// Broker client consumed by the dispatch core.
///
/// Implementations might include:
/// - `InMemoryTransport` - for testing and single-process scenarios
/// - an Azure Service Bus, RabbitMQ or SQS client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Make sure the source exists before anything is received from it.
    ///
    /// For topic subscriptions this must happen before events are published,
    /// otherwise the broker has nowhere to fan them out to.
    async fn ensure_source(&self, _source: &Source) -> Result<(), TransportError> {
        Ok(())
    }

    /// Wait up to `timeout` for the next envelope on `source`.
    ///
    /// Must be cancel-safe: dropping the future must not lose a message.
    async fn receive(
        &self,
        source: &Source,
        timeout: Duration,
    ) -> Result<Option<Envelope>, TransportError>;

    /// Settle: processed, remove from the broker.
    async fn complete(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Settle: release the lock, eligible for immediate redelivery.
    async fn abandon(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Settle: release and redeliver no earlier than `delay` from now.
    async fn schedule_redelivery(
        &self,
        envelope: &Envelope,
        delay: Duration,
    ) -> Result<(), TransportError>;

    /// Settle: move to the dead-letter store. Terminal.
    async fn dead_letter(&self, envelope: &Envelope, reason: &str) -> Result<(), TransportError>;

    /// Send an envelope to a queue or topic.
    async fn send(&self, envelope: Envelope, destination: &Destination)
        -> Result<(), TransportError>;
}
