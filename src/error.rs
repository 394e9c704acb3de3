use std::time::Duration;

use thiserror::Error;

use crate::message::{CodecError, MessageKind};
use crate::transport::TransportError;

/// Startup-time configuration problems.
///
/// Everything in here is detected while the bus is being built, never while a
/// message is being dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A command or request type has more than one handler.
    #[error("message type `{message_type}` must have exactly one handler, found {handlers:?}")]
    AmbiguousHandler {
        /// Message type name.
        message_type: String,
        /// Type names of the competing handlers.
        handlers: Vec<&'static str>,
    },
    /// A handler or interceptor cannot be resolved.
    #[error("component `{component}` required by {required_by} is not registered with the resolver")]
    MissingComponent {
        /// Type name of the missing component.
        component: &'static str,
        /// What needed it.
        required_by: String,
    },
    /// The same message type name is registered as two different kinds.
    #[error("message type `{message_type}` registered as both {first} and {second}")]
    ConflictingMessageKind {
        /// Message type name.
        message_type: String,
        /// Kind seen first.
        first: MessageKind,
        /// Kind seen second.
        second: MessageKind,
    },
    /// The same handler is registered twice for one event.
    #[error("handler `{handler}` registered twice for `{message_type}`")]
    DuplicateHandler {
        /// Message type name.
        message_type: String,
        /// Handler type name.
        handler: &'static str,
    },
    /// A setting is out of range or missing.
    #[error("invalid setting `{setting}`: {reason}")]
    InvalidSetting {
        /// Setting name.
        setting: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// Loading configuration sources failed.
    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// Error type for operations on the [`Bus`](crate::Bus).
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus could not be built.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The transport rejected an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// No reply arrived in time.
    #[error("request `{message_type}` timed out after {timeout:?}")]
    RequestTimeout {
        /// Request message type.
        message_type: String,
        /// How long the caller waited.
        timeout: Duration,
    },
    /// The bus stopped while the caller was still waiting for a reply.
    #[error("request `{message_type}` abandoned: the bus stopped before a reply arrived")]
    RequestAbandoned {
        /// Request message type.
        message_type: String,
    },
    /// The remote request handler failed terminally.
    #[error("request `{message_type}` failed: {reason}")]
    RequestFailed {
        /// Request message type.
        message_type: String,
        /// Failure summary reported by the handler side.
        reason: String,
    },
    /// The message type is not known to this bus.
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),
    /// The operation does not apply to this kind of message.
    #[error("`{message_type}` is a {kind}, which cannot be sent this way")]
    UnsupportedKind {
        /// Message type name.
        message_type: String,
        /// Its kind.
        kind: MessageKind,
    },
    /// `start` was called on a running bus.
    #[error("bus already started")]
    AlreadyStarted,
    /// The operation needs a running bus.
    #[error("bus is not running")]
    NotRunning,
}
