//! Request/response correlation.
//!
//! A request registers a pending slot keyed by a fresh correlation id before
//! it is sent. The reply loop fulfils the slot when a reply with that id
//! arrives. Whoever removes the slot from the map first wins, so a reply
//! racing the caller's timeout is delivered at most once, and a reply that
//! arrives after the timeout is dropped.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::message::Envelope;

/// Why no reply was delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("no reply within {0:?}")]
    TimedOut(Duration),
    #[error("pending reply abandoned")]
    Abandoned,
}

/// Map of outstanding requests.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: DashMap<String, oneshot::Sender<Envelope>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot under a new correlation id.
    pub fn register(self: &Arc<Self>) -> PendingReply {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), sender);
        PendingReply {
            correlation_id,
            receiver: Some(receiver),
            correlator: self.clone(),
        }
    }

    /// Hand a reply to its waiting caller.
    ///
    /// Returns `false` for replies nobody is waiting for: unknown or missing
    /// correlation id, timed out, or already fulfilled.
    pub fn fulfill(&self, reply: Envelope) -> bool {
        let Some(correlation_id) = reply.correlation_id.clone() else {
            debug!(message_id = %reply.id, "reply without correlation id dropped");
            return false;
        };
        match self.pending.remove(&correlation_id) {
            Some((_, sender)) => sender.send(reply).is_ok(),
            None => {
                debug!(%correlation_id, "late or unknown reply dropped");
                false
            }
        }
    }

    /// Requests currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fail every waiting caller with [`CorrelationError::Abandoned`].
    ///
    /// Called once no reply can arrive any more. Returns how many callers
    /// were waiting.
    pub fn abandon_all(&self) -> usize {
        let waiting = self.pending.len();
        self.pending.clear();
        if waiting > 0 {
            debug!(waiting, "pending replies abandoned");
        }
        waiting
    }
}

/// A caller's handle on one outstanding request. Dropping it abandons the slot.
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: String,
    receiver: Option<oneshot::Receiver<Envelope>>,
    correlator: Arc<RequestCorrelator>,
}

impl PendingReply {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait up to `timeout` for the reply.
    pub async fn wait(mut self, timeout: Duration) -> Result<Envelope, CorrelationError> {
        let Some(mut receiver) = self.receiver.take() else {
            return Err(CorrelationError::Abandoned);
        };

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CorrelationError::Abandoned),
            Err(_) => {
                if self.correlator.pending.remove(&self.correlation_id).is_some() {
                    return Err(CorrelationError::TimedOut(timeout));
                }
                // A fulfiller took the slot at the deadline; its send is immediate.
                receiver.await.map_err(|_| CorrelationError::TimedOut(timeout))
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.correlator.pending.remove(&self.correlation_id);
    }
}
