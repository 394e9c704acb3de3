use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::{Bus, BusInner, Outbound};
use crate::config::{BackoffConfig, BusConfig};
use crate::dispatch::{DeliveryPolicy, DispatchRuntime, HandlerRegistry, RetryBackoff};
use crate::error::{BusError, ConfigurationError};
use crate::interceptor::InboundInterceptor;
use crate::message::{BusMessage, Codec, MessageKind};
use crate::resolver::{ComponentKey, DependencyResolver};
use crate::transport::{routing, Transport};

/// Builder for a [`Bus`].
///
/// Settings start from [`BusConfig::default`] (or [`BusBuilder::with_config`])
/// and can be overridden one at a time. A transport and a resolver are
/// required; everything is validated in [`BusBuilder::build`].
pub struct BusBuilder {
    config: BusConfig,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn DependencyResolver>>,
    handlers: HandlerRegistry,
    global_interceptors: Vec<ComponentKey>,
    backoff: Option<Arc<dyn RetryBackoff>>,
    declared: Vec<(&'static str, MessageKind)>,
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BusBuilder {
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            transport: None,
            resolver: None,
            handlers: HandlerRegistry::new(),
            global_interceptors: Vec::new(),
            backoff: None,
            declared: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_names(
        mut self,
        application_name: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        self.config.application_name = application_name.into();
        self.config.instance_name = instance_name.into();
        self
    }

    pub fn with_transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn with_shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_resolver<R: DependencyResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Add an interceptor around every handler. The first one added is the
    /// outermost.
    pub fn with_global_interceptor<I: InboundInterceptor>(mut self) -> Self {
        self.global_interceptors.push(ComponentKey::of::<I>());
        self
    }

    /// Make a message type known without handling it, e.g. for
    /// [`Bus::send_json`].
    pub fn with_message_type<M: BusMessage>(mut self) -> Self {
        self.declared.push((M::MESSAGE_TYPE, M::KIND));
        self
    }

    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.config.max_delivery_attempts = attempts;
        self
    }

    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        self.config.max_concurrent_handlers = max;
        self
    }

    pub fn with_default_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_request_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_ms = duration_ms(grace);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Use a custom backoff strategy instead of the configured one.
    pub fn with_backoff_strategy<B: RetryBackoff + 'static>(mut self, backoff: B) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.config.codec = codec;
        self
    }

    /// Validate everything and assemble the bus.
    pub fn build(self) -> Result<Bus, BusError> {
        self.config.validate()?;

        let transport = self.transport.ok_or(ConfigurationError::InvalidSetting {
            setting: "transport",
            reason: "a transport is required".into(),
        })?;
        let resolver = self.resolver.ok_or(ConfigurationError::InvalidSetting {
            setting: "resolver",
            reason: "a dependency resolver is required".into(),
        })?;

        let bindings = self
            .handlers
            .build(resolver.as_ref(), &self.global_interceptors)?;

        let mut known_types: HashMap<String, MessageKind> = bindings
            .iter()
            .map(|binding| (binding.message_type().to_string(), binding.kind()))
            .collect();
        for (message_type, kind) in self.declared {
            match known_types.get(message_type) {
                Some(&existing) if existing != kind => {
                    return Err(ConfigurationError::ConflictingMessageKind {
                        message_type: message_type.to_string(),
                        first: existing,
                        second: kind,
                    }
                    .into())
                }
                _ => {
                    known_types.insert(message_type.to_string(), kind);
                }
            }
        }

        let backoff = self
            .backoff
            .unwrap_or_else(|| self.config.retry_backoff.build());
        let policy = DeliveryPolicy::new(self.config.max_delivery_attempts).with_backoff(backoff);
        let outbound = Outbound::new(transport, self.config.codec);
        let runtime = DispatchRuntime::new(bindings, resolver, outbound, policy)
            .with_global_interceptors(self.global_interceptors);

        let reply_queue =
            routing::reply_queue(&self.config.application_name, &self.config.instance_name);

        Ok(Bus {
            inner: Arc::new(BusInner {
                config: self.config,
                runtime: Arc::new(runtime),
                known_types,
                reply_queue,
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(None),
            }),
        })
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
