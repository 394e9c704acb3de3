//! Delivery policy: what happens to an envelope after its dispatch.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use super::DispatchError;

/// Settlement chosen for a dispatched envelope. Exactly one per dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryDecision {
    /// Processed; remove from the broker.
    Complete,
    /// Redeliver after the delay. Zero means release immediately.
    RetryAfter(Duration),
    /// Give up and move to the dead-letter store with this reason.
    DeadLetter(String),
}

/// Redelivery delay for a failed attempt.
pub trait RetryBackoff: Send + Sync + Debug {
    /// Delay before redelivering after `attempt` (1-based) failed.
    fn delay(&self, attempt: u32) -> Duration;
}

/// The same delay after every attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Redeliver immediately.
    pub fn immediate() -> Self {
        Self::default()
    }
}

impl RetryBackoff for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// `initial * multiplier^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
}

impl ExponentialBackoff {
    /// A `multiplier` that is NaN, infinite or below 1 is treated as 1,
    /// giving a constant `initial` delay. A `max` below `initial` is raised
    /// to `initial`.
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        Self {
            initial,
            multiplier,
            max: max.max(initial),
        }
    }
}

impl RetryBackoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Bounded-retry policy applied to every dispatch outcome.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    max_delivery_attempts: u32,
    backoff: Arc<dyn RetryBackoff>,
}

impl DeliveryPolicy {
    /// Policy with immediate redelivery. `max_delivery_attempts` below 1 is
    /// treated as 1.
    pub fn new(max_delivery_attempts: u32) -> Self {
        Self {
            max_delivery_attempts: max_delivery_attempts.max(1),
            backoff: Arc::new(ConstantBackoff::immediate()),
        }
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn RetryBackoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_delivery_attempts(&self) -> u32 {
        self.max_delivery_attempts
    }

    pub fn decide(&self, outcome: &Result<(), DispatchError>, attempt: u32) -> DeliveryDecision {
        decide(
            outcome,
            attempt,
            self.max_delivery_attempts,
            self.backoff.as_ref(),
        )
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Map a dispatch outcome and its delivery attempt to a settlement.
///
/// - success completes
/// - a message with no binding is dead-lettered at once, it can never succeed
/// - a cancelled dispatch is released for immediate redelivery and does not
///   count towards dead-lettering
/// - any other failure is retried while `attempt < max_attempts`, then
///   dead-lettered with the failure summary
pub fn decide(
    outcome: &Result<(), DispatchError>,
    attempt: u32,
    max_attempts: u32,
    backoff: &dyn RetryBackoff,
) -> DeliveryDecision {
    match outcome {
        Ok(()) => DeliveryDecision::Complete,
        Err(err @ DispatchError::Routing(_)) => DeliveryDecision::DeadLetter(err.summary()),
        Err(DispatchError::Cancelled) => DeliveryDecision::RetryAfter(Duration::ZERO),
        Err(_) if attempt < max_attempts => DeliveryDecision::RetryAfter(backoff.delay(attempt)),
        Err(err) => DeliveryDecision::DeadLetter(format!(
            "gave up after {attempt} attempt(s): {}",
            err.summary()
        )),
    }
}
