//! Bus settings.
//!
//! Settings can be built in code, loaded from a file, or overridden from the
//! environment:
//!
//! ```toml
//! application_name = "billing"
//! max_delivery_attempts = 3
//! max_concurrent_handlers = 4
//!
//! [retry_backoff]
//! strategy = "exponential"
//! initial_ms = 100
//! multiplier = 2.0
//! max_ms = 5000
//! ```
//!
//! Environment variables use the `COURIER__` prefix with `__` between nested
//! keys, e.g. `COURIER__MAX_DELIVERY_ATTEMPTS=7`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::{ConstantBackoff, ExponentialBackoff, RetryBackoff};
use crate::error::ConfigurationError;
use crate::message::Codec;

const ENV_PREFIX: &str = "COURIER";
const ENV_SEPARATOR: &str = "__";

/// How long to wait before a failed message is delivered again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Same delay for every attempt. Zero means immediate redelivery.
    Constant {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// `initial_ms * multiplier^(attempt - 1)`, capped at `max_ms`.
    Exponential {
        /// Delay after the first attempt.
        initial_ms: u64,
        /// Growth factor per attempt; at least 1.
        multiplier: f64,
        /// Upper bound.
        max_ms: u64,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Constant { delay_ms: 0 }
    }
}

impl BackoffConfig {
    /// Build the backoff strategy these settings describe.
    pub fn build(&self) -> Arc<dyn RetryBackoff> {
        match *self {
            BackoffConfig::Constant { delay_ms } => {
                Arc::new(ConstantBackoff::new(Duration::from_millis(delay_ms)))
            }
            BackoffConfig::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => Arc::new(ExponentialBackoff::new(
                Duration::from_millis(initial_ms),
                multiplier,
                Duration::from_millis(max_ms),
            )),
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if let BackoffConfig::Exponential {
            initial_ms,
            multiplier,
            max_ms,
        } = *self
        {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(invalid(
                    "retry_backoff.multiplier",
                    format!("must be a finite number >= 1, got {multiplier}"),
                ));
            }
            if max_ms < initial_ms {
                return Err(invalid(
                    "retry_backoff.max_ms",
                    format!("must not be below initial_ms ({initial_ms}), got {max_ms}"),
                ));
            }
        }
        Ok(())
    }
}

/// Settings for one bus instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Logical application name. Instances with the same name compete for
    /// events on a shared subscription.
    pub application_name: String,
    /// Name of this process instance; selects its private reply queue.
    pub instance_name: String,
    /// Attempts before a failing message is dead-lettered.
    pub max_delivery_attempts: u32,
    /// Concurrently dispatching messages per subscription.
    pub max_concurrent_handlers: usize,
    /// Default wait for request replies.
    pub default_request_timeout_ms: u64,
    /// How long one receive call waits for a message.
    pub receive_timeout_ms: u64,
    /// How long shutdown waits for in-flight dispatches before cancelling them.
    pub shutdown_grace_ms: u64,
    /// Redelivery delay strategy.
    pub retry_backoff: BackoffConfig,
    /// Payload encoding for outbound messages.
    pub codec: Codec,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            application_name: "courier".to_string(),
            instance_name: uuid::Uuid::new_v4().simple().to_string(),
            max_delivery_attempts: 5,
            max_concurrent_handlers: 10,
            default_request_timeout_ms: 30_000,
            receive_timeout_ms: 1_000,
            shutdown_grace_ms: 10_000,
            retry_backoff: BackoffConfig::default(),
            codec: Codec::default(),
        }
    }
}

impl BusConfig {
    /// Load settings from `path` (optional; format from its extension) and
    /// `COURIER__*` environment variables, over the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Load(e.to_string()))?;

        let loaded: BusConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Load(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings the bus cannot run with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.application_name.trim().is_empty() {
            return Err(invalid("application_name", "must not be empty"));
        }
        if self.instance_name.trim().is_empty() {
            return Err(invalid("instance_name", "must not be empty"));
        }
        if self.max_delivery_attempts == 0 {
            return Err(invalid("max_delivery_attempts", "must be at least 1"));
        }
        if self.max_concurrent_handlers == 0 {
            return Err(invalid("max_concurrent_handlers", "must be at least 1"));
        }
        if self.default_request_timeout_ms == 0 {
            return Err(invalid("default_request_timeout_ms", "must be positive"));
        }
        if self.receive_timeout_ms == 0 {
            return Err(invalid("receive_timeout_ms", "must be positive"));
        }
        self.retry_backoff.validate()
    }

    pub fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn invalid(setting: &'static str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        setting,
        reason: reason.into(),
    }
}
