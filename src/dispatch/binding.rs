//! Handler bindings: which handlers run for which message type.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ConfigurationError;
use crate::handler::{
    HandleCommand, HandleEvent, HandleRequest, HandlerError, MessageContext, MessageHandler,
};
use crate::message::{BusCommand, BusEvent, BusMessage, BusRequest, Codec, CodecError, MessageKind};
use crate::resolver::{ComponentKey, DependencyResolver};

pub(crate) type DecodedMessage = Arc<dyn Any + Send + Sync>;
type DecodeFn = fn(Codec, &[u8]) -> Result<DecodedMessage, CodecError>;

fn decode_as<M: BusMessage>(codec: Codec, bytes: &[u8]) -> Result<DecodedMessage, CodecError> {
    Ok(Arc::new(codec.decode::<M>(bytes)?))
}

/// Calls a type-erased handler with a type-erased message.
///
/// Returns the encoded response for requests and `None` otherwise.
#[async_trait]
pub(crate) trait HandlerInvocation: Send + Sync {
    async fn invoke(
        &self,
        handler: &(dyn Any + Send + Sync),
        message: &(dyn Any + Send + Sync),
        ctx: &MessageContext,
    ) -> Result<Option<Vec<u8>>, HandlerError>;
}

fn downcast<'a, T: Any>(value: &'a (dyn Any + Send + Sync), what: &str) -> Result<&'a T, HandlerError> {
    value.downcast_ref::<T>().ok_or_else(|| {
        HandlerError::Resolution(format!(
            "{what} is not a `{}`",
            std::any::type_name::<T>()
        ))
    })
}

struct CommandInvocation<C, H>(PhantomData<fn() -> (C, H)>);

#[async_trait]
impl<C: BusCommand, H: HandleCommand<C>> HandlerInvocation for CommandInvocation<C, H> {
    async fn invoke(
        &self,
        handler: &(dyn Any + Send + Sync),
        message: &(dyn Any + Send + Sync),
        ctx: &MessageContext,
    ) -> Result<Option<Vec<u8>>, HandlerError> {
        let handler = downcast::<H>(handler, "resolved handler")?;
        let command = downcast::<C>(message, "decoded message")?;
        HandleCommand::<C>::handle(handler, command, ctx).await?;
        Ok(None)
    }
}

struct EventInvocation<E, H>(PhantomData<fn() -> (E, H)>);

#[async_trait]
impl<E: BusEvent, H: HandleEvent<E>> HandlerInvocation for EventInvocation<E, H> {
    async fn invoke(
        &self,
        handler: &(dyn Any + Send + Sync),
        message: &(dyn Any + Send + Sync),
        ctx: &MessageContext,
    ) -> Result<Option<Vec<u8>>, HandlerError> {
        let handler = downcast::<H>(handler, "resolved handler")?;
        let event = downcast::<E>(message, "decoded message")?;
        HandleEvent::<E>::handle(handler, event, ctx).await?;
        Ok(None)
    }
}

struct RequestInvocation<R, H>(PhantomData<fn() -> (R, H)>);

#[async_trait]
impl<R: BusRequest, H: HandleRequest<R>> HandlerInvocation for RequestInvocation<R, H> {
    async fn invoke(
        &self,
        handler: &(dyn Any + Send + Sync),
        message: &(dyn Any + Send + Sync),
        ctx: &MessageContext,
    ) -> Result<Option<Vec<u8>>, HandlerError> {
        let handler = downcast::<H>(handler, "resolved handler")?;
        let request = downcast::<R>(message, "decoded message")?;
        let response = HandleRequest::<R>::handle(handler, request, ctx).await?;
        Ok(Some(ctx.codec().encode(&response)?))
    }
}

/// One handler bound to a message type.
pub(crate) struct HandlerDescriptor {
    pub(crate) handler_name: &'static str,
    pub(crate) handler_key: ComponentKey,
    pub(crate) class_interceptors: Vec<ComponentKey>,
    pub(crate) method_interceptors: Vec<ComponentKey>,
    pub(crate) invocation: Arc<dyn HandlerInvocation>,
}

/// Everything bound to one message type.
pub struct HandlerBinding {
    message_type: &'static str,
    kind: MessageKind,
    decode: DecodeFn,
    pub(crate) handlers: Vec<HandlerDescriptor>,
}

impl HandlerBinding {
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Handler type names in registration order.
    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.handler_name).collect()
    }

    pub(crate) fn decode(&self, codec: Codec, bytes: &[u8]) -> Result<DecodedMessage, CodecError> {
        (self.decode)(codec, bytes)
    }
}

impl std::fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("message_type", &self.message_type)
            .field("kind", &self.kind)
            .field("handlers", &self.handler_names())
            .finish()
    }
}

/// Validated bindings, keyed by message type name. Read-only once built.
#[derive(Debug, Default)]
pub struct HandlerBindings {
    by_type: HashMap<String, HandlerBinding>,
}

impl HandlerBindings {
    pub fn get(&self, message_type: &str) -> Option<&HandlerBinding> {
        self.by_type.get(message_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerBinding> {
        self.by_type.values()
    }

    /// Bound message type names, sorted.
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.by_type.values().map(|b| b.message_type).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

struct Registration {
    message_type: &'static str,
    kind: MessageKind,
    decode: DecodeFn,
    descriptor: HandlerDescriptor,
}

/// Collects handler registrations and validates them into [`HandlerBindings`].
///
/// ```ignore
/// let registry = HandlerRegistry::new()
///     .command::<PlaceOrder, PlaceOrderHandler>()
///     .event::<OrderPlaced, SendReceipt>()
///     .event::<OrderPlaced, UpdateStock>()
///     .request::<GetOrder, GetOrderHandler>();
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command<C: BusCommand, H: HandleCommand<C>>(self) -> Self {
        self.register::<C, H>(
            <H as HandleCommand<C>>::method_interceptors(),
            Arc::new(CommandInvocation::<C, H>(PhantomData)),
        )
    }

    pub fn event<E: BusEvent, H: HandleEvent<E>>(self) -> Self {
        self.register::<E, H>(
            <H as HandleEvent<E>>::method_interceptors(),
            Arc::new(EventInvocation::<E, H>(PhantomData)),
        )
    }

    pub fn request<R: BusRequest, H: HandleRequest<R>>(self) -> Self {
        self.register::<R, H>(
            <H as HandleRequest<R>>::method_interceptors(),
            Arc::new(RequestInvocation::<R, H>(PhantomData)),
        )
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    fn register<M: BusMessage, H: MessageHandler>(
        mut self,
        method_interceptors: Vec<ComponentKey>,
        invocation: Arc<dyn HandlerInvocation>,
    ) -> Self {
        let handler_key = ComponentKey::of::<H>();
        self.registrations.push(Registration {
            message_type: M::MESSAGE_TYPE,
            kind: M::KIND,
            decode: decode_as::<M>,
            descriptor: HandlerDescriptor {
                handler_name: handler_key.type_name(),
                handler_key,
                class_interceptors: H::class_interceptors(),
                method_interceptors,
                invocation,
            },
        });
        self
    }

    /// Validate registrations against the resolver and freeze them.
    ///
    /// Fails if a command or request has more than one handler, a handler is
    /// registered twice for an event, one type name is used with two kinds,
    /// or any handler or interceptor cannot be resolved.
    pub fn build(
        self,
        resolver: &dyn DependencyResolver,
        global_interceptors: &[ComponentKey],
    ) -> Result<HandlerBindings, ConfigurationError> {
        for key in global_interceptors {
            require(resolver, key, || "global interceptors".to_string())?;
        }

        let mut by_type: HashMap<String, HandlerBinding> = HashMap::new();
        for registration in self.registrations {
            let Registration {
                message_type,
                kind,
                decode,
                descriptor,
            } = registration;

            require(resolver, &descriptor.handler_key, || {
                format!("message type `{message_type}`")
            })?;
            for key in descriptor
                .class_interceptors
                .iter()
                .chain(&descriptor.method_interceptors)
            {
                require(resolver, key, || {
                    format!("handler `{}`", descriptor.handler_name)
                })?;
            }

            match by_type.entry(message_type.to_string()) {
                Entry::Vacant(entry) => {
                    entry.insert(HandlerBinding {
                        message_type,
                        kind,
                        decode,
                        handlers: vec![descriptor],
                    });
                }
                Entry::Occupied(mut entry) => {
                    let binding = entry.get_mut();
                    if binding.kind != kind {
                        return Err(ConfigurationError::ConflictingMessageKind {
                            message_type: message_type.to_string(),
                            first: binding.kind,
                            second: kind,
                        });
                    }
                    if binding
                        .handlers
                        .iter()
                        .any(|h| h.handler_key == descriptor.handler_key)
                    {
                        return Err(ConfigurationError::DuplicateHandler {
                            message_type: message_type.to_string(),
                            handler: descriptor.handler_name,
                        });
                    }
                    if kind != MessageKind::Event {
                        let mut handlers = binding.handler_names();
                        handlers.push(descriptor.handler_name);
                        return Err(ConfigurationError::AmbiguousHandler {
                            message_type: message_type.to_string(),
                            handlers,
                        });
                    }
                    binding.handlers.push(descriptor);
                }
            }
        }

        Ok(HandlerBindings { by_type })
    }
}

fn require(
    resolver: &dyn DependencyResolver,
    key: &ComponentKey,
    required_by: impl FnOnce() -> String,
) -> Result<(), ConfigurationError> {
    if resolver.can_resolve(key) {
        Ok(())
    } else {
        Err(ConfigurationError::MissingComponent {
            component: key.type_name(),
            required_by: required_by(),
        })
    }
}

/// Register several handlers on a [`HandlerRegistry`] in one go.
///
/// ```ignore
/// let registry = register_handlers!(HandlerRegistry::new(),
///     command PlaceOrder => PlaceOrderHandler,
///     event OrderPlaced => SendReceipt,
///     request GetOrder => GetOrderHandler,
/// );
/// ```
#[macro_export]
macro_rules! register_handlers {
    ($registry:expr, $( $kind:ident $message:ty => $handler:ty ),+ $(,)?) => {
        $registry
        $(
            .$kind::<$message, $handler>()
        )+
    };
}
