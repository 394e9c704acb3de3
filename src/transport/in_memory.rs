//! In-memory transport for testing and single-process scenarios.
//!
//! This module provides a thread-safe in-memory broker that implements the
//! [`Transport`] trait, useful for:
//! - Unit and integration testing without external dependencies
//! - Single-process applications
//! - Development and prototyping

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Destination, Source, Transport, TransportError};
use crate::message::Envelope;

/// How a received envelope was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Processed and removed.
    Completed,
    /// Released for immediate redelivery.
    Abandoned,
    /// Released for redelivery after a delay.
    Rescheduled(Duration),
    /// Moved to the dead-letter store.
    DeadLettered(String),
}

/// A message that reached the dead-letter store.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Path of the queue or subscription it was received from.
    pub source: String,
    /// The envelope as last delivered.
    pub envelope: Envelope,
    /// Why it was dead-lettered.
    pub reason: String,
}

/// In-memory broker with queues, topics and competing-consumer subscriptions.
///
/// Features:
/// - Thread-safe (can be shared across tasks via `Clone`)
/// - Each received envelope carries a lock token; settling twice fails with
///   [`TransportError::LockLost`]
/// - Abandoned and rescheduled envelopes come back with an increased
///   delivery attempt count
/// - Dead letters are kept until the transport is dropped
///
/// Transports built with [`InMemoryTransport::recording`] also keep every
/// settlement and every sent envelope for inspection. Those logs are never
/// trimmed, so use that constructor in tests only.
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use courier_rust::transport::{Destination, InMemoryTransport, Source, Transport};
/// use courier_rust::Envelope;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let transport = InMemoryTransport::new();
/// let queue = Destination::Queue("q.orders".into());
/// transport.send(Envelope::new("orders.place", b"{}".to_vec()), &queue).await.unwrap();
///
/// let source = Source::Queue("q.orders".into());
/// let envelope = transport.receive(&source, Duration::from_millis(10)).await.unwrap().unwrap();
/// transport.complete(&envelope).await.unwrap();
/// assert_eq!(transport.pending(&source), 0);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Queue and subscription contents keyed by path.
    channels: HashMap<String, Channel>,
    /// Subscription paths per topic.
    subscriptions: HashMap<String, BTreeSet<String>>,
    /// Received but unsettled envelopes keyed by lock token.
    locked: HashMap<String, Locked>,
    dead_letters: Vec<DeadLetter>,
    /// Whether `settlements` and `sent` are kept.
    recording: bool,
    settlements: Vec<(String, Settlement)>,
    sent: Vec<(Destination, Envelope)>,
}

#[derive(Default)]
struct Channel {
    messages: VecDeque<Envelope>,
    notify: Arc<Notify>,
}

struct Locked {
    path: String,
    envelope: Envelope,
}

impl State {
    fn channel(&mut self, path: &str) -> &mut Channel {
        self.channels.entry(path.to_string()).or_default()
    }

    fn register_source(&mut self, source: &Source) {
        if let Source::Subscription { topic, .. } = source {
            self.subscriptions
                .entry(topic.clone())
                .or_default()
                .insert(source.path());
        }
        self.channel(&source.path());
    }

    fn enqueue(&mut self, path: &str, envelope: Envelope) {
        let channel = self.channel(path);
        channel.messages.push_back(envelope);
        channel.notify.notify_one();
    }

    fn take_next(&mut self, path: &str) -> Option<Envelope> {
        let envelope = self.channels.get_mut(path)?.messages.pop_front()?;
        let token = uuid::Uuid::new_v4().to_string();
        self.locked.insert(
            token.clone(),
            Locked {
                path: path.to_string(),
                envelope: envelope.clone(),
            },
        );
        Some(envelope.with_lock_token(token))
    }

    fn settled(&mut self, envelope: &Envelope, settlement: Settlement) {
        if self.recording {
            self.settlements.push((envelope.id.clone(), settlement));
        }
    }

    fn unlock(&mut self, envelope: &Envelope) -> Result<Locked, TransportError> {
        envelope
            .lock_token()
            .and_then(|token| self.locked.remove(token))
            .ok_or_else(|| TransportError::LockLost {
                message_id: envelope.id.clone(),
            })
    }
}

impl InMemoryTransport {
    /// Create a new, empty in-memory transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`new`](Self::new), but keeps a log of settlements and sent
    /// envelopes for [`settlements`](Self::settlements) and
    /// [`sent`](Self::sent).
    pub fn recording() -> Self {
        let transport = Self::default();
        transport.inner.state.lock().recording = true;
        transport
    }

    /// Number of envelopes waiting on a source.
    pub fn pending(&self, source: &Source) -> usize {
        self.inner
            .state
            .lock()
            .channels
            .get(&source.path())
            .map_or(0, |c| c.messages.len())
    }

    /// Number of envelopes received but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().locked.len()
    }

    /// Everything that reached the dead-letter store.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.state.lock().dead_letters.clone()
    }

    /// Every settlement, in order, as `(message id, settlement)`. Empty
    /// unless built with [`recording`](Self::recording).
    pub fn settlements(&self) -> Vec<(String, Settlement)> {
        self.inner.state.lock().settlements.clone()
    }

    /// Settlements recorded for one message id.
    pub fn settlements_for(&self, message_id: &str) -> Vec<Settlement> {
        self.inner
            .state
            .lock()
            .settlements
            .iter()
            .filter(|(id, _)| id == message_id)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Every envelope sent, with its destination. Empty unless built with
    /// [`recording`](Self::recording).
    pub fn sent(&self) -> Vec<(Destination, Envelope)> {
        self.inner.state.lock().sent.clone()
    }

    /// Envelopes sent to one destination.
    pub fn sent_to(&self, destination: &Destination) -> Vec<Envelope> {
        self.inner
            .state
            .lock()
            .sent
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn requeue(&self, path: &str, envelope: Envelope) {
        self.inner.state.lock().enqueue(path, envelope);
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn ensure_source(&self, source: &Source) -> Result<(), TransportError> {
        self.inner.state.lock().register_source(source);
        Ok(())
    }

    async fn receive(
        &self,
        source: &Source,
        timeout: Duration,
    ) -> Result<Option<Envelope>, TransportError> {
        let path = source.path();
        let deadline = Instant::now() + timeout;

        loop {
            let notify = {
                let mut state = self.inner.state.lock();
                state.register_source(source);
                if let Some(envelope) = state.take_next(&path) {
                    return Ok(Some(envelope));
                }
                Arc::clone(&state.channel(&path).notify)
            };

            // notify_one stores a permit when nobody waits, so a send that
            // lands between the unlock above and this await is not missed.
            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        state.unlock(envelope)?;
        state.settled(envelope, Settlement::Completed);
        Ok(())
    }

    async fn abandon(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        let locked = state.unlock(envelope)?;
        state.settled(envelope, Settlement::Abandoned);
        state.enqueue(&locked.path, locked.envelope.redelivered());
        Ok(())
    }

    async fn schedule_redelivery(
        &self,
        envelope: &Envelope,
        delay: Duration,
    ) -> Result<(), TransportError> {
        let locked = {
            let mut state = self.inner.state.lock();
            let locked = state.unlock(envelope)?;
            state.settled(envelope, Settlement::Rescheduled(delay));
            locked
        };

        let next = locked.envelope.redelivered();
        if delay.is_zero() {
            self.requeue(&locked.path, next);
        } else {
            let transport = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                transport.requeue(&locked.path, next);
            });
        }
        Ok(())
    }

    async fn dead_letter(&self, envelope: &Envelope, reason: &str) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        let locked = state.unlock(envelope)?;
        state.settled(envelope, Settlement::DeadLettered(reason.to_string()));
        state.dead_letters.push(DeadLetter {
            source: locked.path,
            envelope: locked.envelope,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn send(
        &self,
        envelope: Envelope,
        destination: &Destination,
    ) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        if state.recording {
            state.sent.push((destination.clone(), envelope.clone()));
        }

        match destination {
            Destination::Queue(name) => state.enqueue(name, envelope),
            Destination::Topic(topic) => {
                // A topic without subscriptions drops the message, like a real broker.
                let paths: Vec<String> = state
                    .subscriptions
                    .get(topic)
                    .map(|subs| subs.iter().cloned().collect())
                    .unwrap_or_default();
                for path in paths {
                    state.enqueue(&path, envelope.clone());
                }
            }
        }
        Ok(())
    }
}
