//! Dispatch loop: competing consumer for one source.
//!
//! A loop pulls envelopes from its source and dispatches each on its own
//! task, with at most `max_concurrent` dispatches in flight. Several loops
//! (or processes) on the same source compete for its messages.
//!
//! Shutdown stops receiving at once, waits up to the grace period for
//! in-flight dispatches, then cancels whatever is left; cancelled dispatches
//! release their envelopes for redelivery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DeliveryDecision, DispatchError, DispatchReport, DispatchRuntime, Dispatcher};
use crate::message::Envelope;
use crate::transport::Source;

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Counters for one dispatch loop.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    /// Source path the loop consumes.
    pub source: String,
    /// Envelopes received, replies included.
    pub received: usize,
    /// Dispatches that completed their envelope.
    pub completed: usize,
    /// Dispatches that released their envelope for redelivery.
    pub retried: usize,
    /// Dispatches that dead-lettered their envelope.
    pub dead_lettered: usize,
    /// Dispatches cancelled by shutdown.
    pub cancelled: usize,
    /// Replies handed to waiting requests.
    pub replies: usize,
    pub receive_errors: usize,
    pub settle_errors: usize,
    /// Highest number of dispatches in flight at once.
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicUsize,
    completed: AtomicUsize,
    retried: AtomicUsize,
    dead_lettered: AtomicUsize,
    cancelled: AtomicUsize,
    replies: AtomicUsize,
    receive_errors: AtomicUsize,
    settle_errors: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn enter_flight(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn record(&self, report: &DispatchReport) {
        match report.decision {
            DeliveryDecision::Complete => Self::bump(&self.completed),
            DeliveryDecision::RetryAfter(_) => Self::bump(&self.retried),
            DeliveryDecision::DeadLetter(_) => Self::bump(&self.dead_lettered),
        }
        if matches!(report.outcome, Err(DispatchError::Cancelled)) {
            Self::bump(&self.cancelled);
        }
        if report.settle_error.is_some() {
            Self::bump(&self.settle_errors);
        }
    }

    fn snapshot(&self, source: &Source) -> LoopStats {
        let load = |counter: &AtomicUsize| counter.load(Ordering::SeqCst);
        LoopStats {
            source: source.path(),
            received: load(&self.received),
            completed: load(&self.completed),
            retried: load(&self.retried),
            dead_lettered: load(&self.dead_lettered),
            cancelled: load(&self.cancelled),
            replies: load(&self.replies),
            receive_errors: load(&self.receive_errors),
            settle_errors: load(&self.settle_errors),
            peak_in_flight: load(&self.peak_in_flight),
        }
    }
}

/// A competing consumer for one [`Source`].
///
/// ## Example
///
/// ```ignore
/// let handle = DispatchLoop::new(runtime, Source::Queue("q.orders.place".into()))
///     .with_max_concurrent(4)
///     .spawn();
///
/// // ... send commands ...
///
/// let stats = handle.stop().await;
/// println!("completed {}", stats.completed);
/// ```
pub struct DispatchLoop {
    runtime: Arc<DispatchRuntime>,
    source: Source,
    max_concurrent: usize,
    receive_timeout: Duration,
    shutdown_grace: Duration,
}

impl DispatchLoop {
    pub fn new(runtime: Arc<DispatchRuntime>, source: Source) -> Self {
        Self {
            runtime,
            source,
            max_concurrent: 10,
            receive_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
        }
    }

    /// Dispatches in flight at once. Values below 1 are treated as 1.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self) -> LoopHandle {
        self.spawn_with_shutdown(CancellationToken::new())
    }

    /// Start the loop; it stops when `shutdown` (or the handle) is cancelled.
    pub fn spawn_with_shutdown(self, shutdown: CancellationToken) -> LoopHandle {
        let counters = Arc::new(Counters::default());
        let source = self.source.clone();
        let task = tokio::spawn(self.run(shutdown.clone(), counters.clone()));
        LoopHandle {
            source,
            shutdown,
            counters,
            task: Some(task),
        }
    }

    async fn run(self, shutdown: CancellationToken, counters: Arc<Counters>) {
        let transport = self.runtime.transport().clone();
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let abort = CancellationToken::new();
        let mut in_flight: JoinSet<()> = JoinSet::new();

        info!(source = %self.source, max_concurrent = self.max_concurrent, "dispatch loop started");

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join(joined);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = transport.receive(&self.source, self.receive_timeout) => received,
            };

            let envelope = match received {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(err) => {
                    Counters::bump(&counters.receive_errors);
                    warn!(source = %self.source, error = %err, "receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => continue,
                    }
                }
            };
            Counters::bump(&counters.received);

            if envelope.is_reply() {
                self.accept_reply(envelope, &counters).await;
                continue;
            }

            let dispatcher = Dispatcher::new(self.runtime.clone(), abort.child_token());
            let counters = counters.clone();
            counters.enter_flight();
            in_flight.spawn(async move {
                let report = dispatcher.dispatch(envelope).await;
                counters.record(&report);
                counters.exit_flight();
                drop(permit);
            });
        }

        let pending = in_flight.len();
        if pending > 0 {
            info!(source = %self.source, pending, "draining in-flight dispatches");
        }
        let drained = tokio::time::timeout(self.shutdown_grace, drain(&mut in_flight)).await;
        if drained.is_err() {
            warn!(
                source = %self.source,
                remaining = in_flight.len(),
                "shutdown grace elapsed; cancelling in-flight dispatches"
            );
            abort.cancel();
            drain(&mut in_flight).await;
        }

        info!(source = %self.source, "dispatch loop stopped");
    }

    async fn accept_reply(&self, reply: Envelope, counters: &Counters) {
        if self.runtime.correlator.fulfill(reply.clone()) {
            Counters::bump(&counters.replies);
        }
        if let Err(err) = self.runtime.transport().complete(&reply).await {
            Counters::bump(&counters.settle_errors);
            warn!(message_id = %reply.id, error = %err, "failed to complete reply");
        }
        debug!(message_id = %reply.id, "reply consumed");
    }
}

async fn drain(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "dispatch task failed");
    }
}

/// Handle to a running [`DispatchLoop`].
pub struct LoopHandle {
    source: Source,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
    task: Option<JoinHandle<()>>,
}

impl LoopHandle {
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Current counters, while the loop keeps running.
    pub fn stats(&self) -> LoopStats {
        self.counters.snapshot(&self.source)
    }

    /// Stop receiving without waiting for the loop to drain.
    pub fn signal_stop(&self) {
        self.shutdown.cancel();
    }

    /// Stop the loop, wait for it to drain and return its final counters.
    pub async fn stop(mut self) -> LoopStats {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!(source = %self.source, error = %err, "dispatch loop task failed");
            }
        }
        self.stats()
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
