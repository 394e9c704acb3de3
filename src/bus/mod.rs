//! The bus: the application-facing entry point.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Bus (per process)                       │
//! │  - send() / publish() / request()                            │
//! │  - start() spawns one DispatchLoop per handled source        │
//! │    plus one for this instance's reply queue                  │
//! │  - stop() drains the loops and returns their stats           │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!            ┌───────────────┼────────────────┐
//!            ▼               ▼                ▼
//!      q.<command>     t.<event>/subs/<app>   r.<app>.<instance>
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let bus = Bus::builder()
//!     .with_names("billing", "node-1")
//!     .with_transport(InMemoryTransport::new())
//!     .with_resolver(ComponentRegistry::new().handler(|| ChargeCardHandler))
//!     .with_handlers(HandlerRegistry::new().command::<ChargeCard, ChargeCardHandler>())
//!     .build()?;
//!
//! bus.start().await?;
//! bus.send(&ChargeCard { amount: 10 }).await?;
//! let stats = bus.stop().await?;
//! ```

mod builder;
mod outbound;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BusConfig;
use crate::dispatch::{CorrelationError, DispatchLoop, DispatchRuntime, LoopHandle, LoopStats};
use crate::error::BusError;
use crate::message::{
    BusCommand, BusEvent, BusRequest, Codec, Envelope, MessageKind, CONTENT_TYPE_PROPERTY,
};
use crate::transport::{routing, Source};

pub use builder::BusBuilder;
pub use outbound::Outbound;

struct Running {
    shutdown: CancellationToken,
    loops: Vec<LoopHandle>,
}

struct BusInner {
    config: BusConfig,
    runtime: Arc<DispatchRuntime>,
    known_types: HashMap<String, MessageKind>,
    reply_queue: String,
    running: AtomicBool,
    lifecycle: Mutex<Option<Running>>,
}

/// Handle to a configured bus. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    pub fn runtime(&self) -> &Arc<DispatchRuntime> {
        &self.inner.runtime
    }

    /// Queue this instance receives replies on.
    pub fn reply_queue(&self) -> &str {
        &self.inner.reply_queue
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Message types this bus handles or was told about, with their kinds.
    pub fn message_types(&self) -> BTreeMap<&str, MessageKind> {
        self.inner
            .known_types
            .iter()
            .map(|(name, kind)| (name.as_str(), *kind))
            .collect()
    }

    /// Sources this bus consumes once started: one per handled message type
    /// plus the reply queue.
    pub fn sources(&self) -> Vec<Source> {
        let application = &self.inner.config.application_name;
        let mut sources: Vec<Source> = self
            .inner
            .runtime
            .bindings()
            .iter()
            .filter_map(|binding| {
                routing::source_for(binding.kind(), binding.message_type(), application)
            })
            .collect();
        sources.sort_by_key(Source::path);
        sources.dedup();
        sources.push(Source::Queue(self.inner.reply_queue.clone()));
        sources
    }

    /// Provision sources and start one dispatch loop per source.
    pub async fn start(&self) -> Result<(), BusError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(BusError::AlreadyStarted);
        }

        let sources = self.sources();
        let transport = self.inner.runtime.transport();
        for source in &sources {
            transport.ensure_source(source).await?;
        }

        let config = &self.inner.config;
        let shutdown = CancellationToken::new();
        let loops = sources
            .into_iter()
            .map(|source| {
                DispatchLoop::new(self.inner.runtime.clone(), source)
                    .with_max_concurrent(config.max_concurrent_handlers)
                    .with_receive_timeout(config.receive_timeout())
                    .with_shutdown_grace(config.shutdown_grace())
                    .spawn_with_shutdown(shutdown.child_token())
            })
            .collect::<Vec<_>>();

        info!(
            application = %config.application_name,
            instance = %config.instance_name,
            loops = loops.len(),
            "bus started"
        );
        *lifecycle = Some(Running { shutdown, loops });
        self.inner.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop receiving, drain in-flight dispatches within the shutdown grace
    /// period and return each loop's final counters.
    ///
    /// Requests still waiting for a reply fail with
    /// [`BusError::RequestAbandoned`].
    pub async fn stop(&self) -> Result<Vec<LoopStats>, BusError> {
        let running = self
            .inner
            .lifecycle
            .lock()
            .await
            .take()
            .ok_or(BusError::NotRunning)?;
        self.inner.running.store(false, Ordering::SeqCst);

        running.shutdown.cancel();
        let stats = join_all(running.loops.into_iter().map(LoopHandle::stop)).await;
        // The reply loop is gone, so nobody still waiting can be answered.
        self.inner.runtime.correlator().abandon_all();
        info!(loops = stats.len(), "bus stopped");
        Ok(stats)
    }

    /// Live counters of the running loops.
    pub async fn loop_stats(&self) -> Vec<LoopStats> {
        match self.inner.lifecycle.lock().await.as_ref() {
            Some(running) => running.loops.iter().map(LoopHandle::stats).collect(),
            None => Vec::new(),
        }
    }

    /// Send a command to its handler's queue.
    pub async fn send<C: BusCommand>(&self, command: &C) -> Result<(), BusError> {
        let outbound = self.inner.runtime.outbound();
        let envelope = outbound.envelope_for(command)?;
        outbound.send_envelope_for::<C>(envelope).await
    }

    /// Publish an event to its topic.
    pub async fn publish<E: BusEvent>(&self, event: &E) -> Result<(), BusError> {
        let outbound = self.inner.runtime.outbound();
        let envelope = outbound.envelope_for(event)?;
        outbound.send_envelope_for::<E>(envelope).await
    }

    /// Send a request and wait for its response, up to the configured
    /// default timeout.
    pub async fn request<R: BusRequest>(&self, request: &R) -> Result<R::Response, BusError> {
        self.request_with_timeout(request, self.inner.config.default_request_timeout())
            .await
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// Needs a started bus: replies arrive through this instance's reply loop.
    pub async fn request_with_timeout<R: BusRequest>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Response, BusError> {
        if !self.is_running() {
            return Err(BusError::NotRunning);
        }

        let outbound = self.inner.runtime.outbound();
        let pending = self.inner.runtime.correlator().register();
        let envelope = outbound
            .envelope_for(request)?
            .with_correlation_id(pending.correlation_id())
            .with_reply_to(self.inner.reply_queue.clone());
        outbound.send_envelope_for::<R>(envelope).await?;

        let reply = pending.wait(timeout).await.map_err(|err| match err {
            CorrelationError::TimedOut(timeout) => BusError::RequestTimeout {
                message_type: R::MESSAGE_TYPE.to_string(),
                timeout,
            },
            CorrelationError::Abandoned => BusError::RequestAbandoned {
                message_type: R::MESSAGE_TYPE.to_string(),
            },
        })?;

        if let Some(reason) = reply.reply_failure() {
            return Err(BusError::RequestFailed {
                message_type: R::MESSAGE_TYPE.to_string(),
                reason: reason.to_string(),
            });
        }

        let codec = match reply.property(CONTENT_TYPE_PROPERTY) {
            Some(content_type) => Codec::from_content_type(content_type)?,
            None => outbound.codec(),
        };
        Ok(codec.decode(&reply.payload)?)
    }

    /// Send an untyped JSON command or event by message type name.
    ///
    /// `properties` are copied onto the envelope; the bus's own properties
    /// win on conflicts. Returns the new message id.
    pub async fn send_json(
        &self,
        message_type: &str,
        payload: &serde_json::Value,
        properties: BTreeMap<String, String>,
    ) -> Result<String, BusError> {
        let kind = *self
            .inner
            .known_types
            .get(message_type)
            .ok_or_else(|| BusError::UnknownMessageType(message_type.to_string()))?;
        let destination = match kind {
            MessageKind::Command | MessageKind::Event => routing::destination_for(kind, message_type),
            MessageKind::Request | MessageKind::Reply => None,
        }
        .ok_or_else(|| BusError::UnsupportedKind {
            message_type: message_type.to_string(),
            kind,
        })?;

        let mut envelope = Envelope::new(message_type, Codec::Json.encode(payload)?);
        envelope.properties = properties;
        let envelope = envelope
            .with_kind(kind)
            .with_property(CONTENT_TYPE_PROPERTY, Codec::Json.content_type());
        let id = envelope.id.clone();

        self.inner
            .runtime
            .outbound()
            .send_envelope(envelope, &destination)
            .await?;
        Ok(id)
    }
}
