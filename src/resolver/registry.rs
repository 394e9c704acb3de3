//! Factory-backed resolver for applications without a container of their own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Component, ComponentKey, DependencyResolver, ResolutionScope, ResolveError};
use crate::interceptor::InboundInterceptor;

type Factory = Arc<dyn Fn() -> Component + Send + Sync>;

#[derive(Default)]
struct Inner {
    factories: HashMap<ComponentKey, Factory>,
    scopes_opened: AtomicUsize,
    scopes_released: AtomicUsize,
}

/// A [`DependencyResolver`] built from per-type factory closures.
///
/// Every resolution calls the factory, so each dispatch gets fresh handler
/// and interceptor instances. Share state between instances by capturing an
/// `Arc` in the closure.
///
/// ```ignore
/// let registry = ComponentRegistry::new()
///     .handler(move || PlaceOrderHandler { orders: orders.clone() })
///     .interceptor(|| AuditInterceptor);
/// ```
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    inner: Arc<Inner>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler factory, keyed by the handler's type.
    pub fn handler<H, F>(self, factory: F) -> Self
    where
        H: Send + Sync + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.insert(
            ComponentKey::of::<H>(),
            Arc::new(move || Box::new(factory()) as Component),
        )
    }

    /// Register an interceptor factory, keyed by the interceptor's type.
    pub fn interceptor<I, F>(self, factory: F) -> Self
    where
        I: InboundInterceptor,
        F: Fn() -> I + Send + Sync + 'static,
    {
        self.insert(
            ComponentKey::of::<I>(),
            Arc::new(move || {
                let interceptor: Arc<dyn InboundInterceptor> = Arc::new(factory());
                Box::new(interceptor) as Component
            }),
        )
    }

    /// Register one interceptor instance shared by every dispatch.
    pub fn shared_interceptor<I: InboundInterceptor>(self, instance: Arc<I>) -> Self {
        self.insert(
            ComponentKey::of::<I>(),
            Arc::new(move || {
                let interceptor: Arc<dyn InboundInterceptor> = instance.clone();
                Box::new(interceptor) as Component
            }),
        )
    }

    /// Scopes opened so far.
    pub fn scopes_opened(&self) -> usize {
        self.inner.scopes_opened.load(Ordering::SeqCst)
    }

    /// Scopes released so far.
    pub fn scopes_released(&self) -> usize {
        self.inner.scopes_released.load(Ordering::SeqCst)
    }

    fn insert(mut self, key: ComponentKey, factory: Factory) -> Self {
        // Registration happens before the registry is shared.
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                inner.factories.insert(key, factory);
                self
            }
            None => {
                let mut factories = self.inner.factories.clone();
                factories.insert(key, factory);
                Self {
                    inner: Arc::new(Inner {
                        factories,
                        ..Inner::default()
                    }),
                }
            }
        }
    }
}

impl DependencyResolver for ComponentRegistry {
    fn begin_scope(&self) -> Box<dyn ResolutionScope> {
        self.inner.scopes_opened.fetch_add(1, Ordering::SeqCst);
        Box::new(RegistryScope {
            inner: self.inner.clone(),
        })
    }

    fn can_resolve(&self, key: &ComponentKey) -> bool {
        self.inner.factories.contains_key(key)
    }
}

struct RegistryScope {
    inner: Arc<Inner>,
}

impl ResolutionScope for RegistryScope {
    fn resolve(&mut self, key: &ComponentKey) -> Result<Component, ResolveError> {
        let factory = self
            .inner
            .factories
            .get(key)
            .ok_or(ResolveError::NotRegistered(key.type_name()))?;
        Ok(factory())
    }

    fn release(self: Box<Self>) {
        self.inner.scopes_released.fetch_add(1, Ordering::SeqCst);
    }
}
