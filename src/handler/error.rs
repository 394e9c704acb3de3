//! Error type for message handlers and interceptor hooks.

use std::any::Any;
use std::error::Error;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;

use crate::error::BusError;
use crate::message::CodecError;

/// Error type for handler and interceptor operations.
///
/// Cloneable so one failure can be reported to every error hook, collected
/// into aggregate event outcomes and summarised into a dead-letter reason.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Processing failed; worth retrying.
    #[error("handler failed: {0}")]
    Failed(String),
    /// Business logic rejected the message (validation, invariant violation).
    #[error("rejected: {0}")]
    Rejected(String),
    /// Aggregate or resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The handler or one of its interceptors could not be resolved.
    #[error("resolution failed: {0}")]
    Resolution(String),
    /// The handler or a hook panicked.
    #[error("panicked: {0}")]
    Panicked(String),
    /// Other error.
    #[error("handler error: {0}")]
    Other(Arc<dyn Error + Send + Sync>),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    /// Wrap any error.
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        HandlerError::Other(Arc::new(err))
    }
}

impl From<CodecError> for HandlerError {
    fn from(err: CodecError) -> Self {
        HandlerError::other(err)
    }
}

impl From<BusError> for HandlerError {
    fn from(err: BusError) -> Self {
        HandlerError::other(err)
    }
}

/// Run a handler or hook future, turning a panic into [`HandlerError::Panicked`].
pub(crate) async fn catch_panic<T, F>(future: F) -> Result<T, HandlerError>
where
    F: Future<Output = Result<T, HandlerError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
