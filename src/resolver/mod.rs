//! Dependency resolution: where handler and interceptor instances come from.
//!
//! Each dispatch opens one [`ResolutionScope`], resolves the handler and all
//! of its interceptors from it, and releases it exactly once when the
//! dispatch closes. Components are type-erased; the dispatch core downcasts
//! them back to the concrete types recorded at registration.

mod registry;

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::interceptor::InboundInterceptor;

pub use registry::ComponentRegistry;

/// A resolved, type-erased component instance.
pub type Component = Box<dyn Any + Send + Sync>;

/// Identifies a component type.
#[derive(Clone, Copy)]
pub struct ComponentKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl ComponentKey {
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for ComponentKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ComponentKey {}

impl Hash for ComponentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Error type for component resolution.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("no component registered for `{0}`")]
    NotRegistered(&'static str),
    #[error("component resolved for `{0}` has an unexpected type")]
    TypeMismatch(&'static str),
    #[error("component `{component}` could not be constructed: {reason}")]
    Construction {
        component: &'static str,
        reason: String,
    },
    #[error("resolution scope already released")]
    Released,
}

/// Source of handler and interceptor instances.
pub trait DependencyResolver: Send + Sync {
    /// Open a scope for one dispatch.
    fn begin_scope(&self) -> Box<dyn ResolutionScope>;

    /// Whether `key` can be resolved at all. Checked once at startup so that
    /// missing registrations fail the build rather than the first message.
    fn can_resolve(&self, _key: &ComponentKey) -> bool {
        true
    }
}

/// Per-dispatch resolution scope.
pub trait ResolutionScope: Send {
    fn resolve(&mut self, key: &ComponentKey) -> Result<Component, ResolveError>;

    /// Dispose of everything resolved in this scope.
    fn release(self: Box<Self>);
}

/// Owns a scope for the length of one dispatch and releases it exactly once,
/// either explicitly or on drop.
pub struct ScopeGuard {
    scope: Option<Box<dyn ResolutionScope>>,
}

impl ScopeGuard {
    pub fn new(scope: Box<dyn ResolutionScope>) -> Self {
        Self { scope: Some(scope) }
    }

    /// A guard that holds nothing, for dispatches that never open a scope.
    pub fn empty() -> Self {
        Self { scope: None }
    }

    pub fn resolve(&mut self, key: &ComponentKey) -> Result<Component, ResolveError> {
        match self.scope.as_mut() {
            Some(scope) => scope.resolve(key),
            None => Err(ResolveError::Released),
        }
    }

    /// Resolve a component registered as an interceptor.
    pub fn resolve_interceptor(
        &mut self,
        key: &ComponentKey,
    ) -> Result<Arc<dyn InboundInterceptor>, ResolveError> {
        self.resolve(key)?
            .downcast::<Arc<dyn InboundInterceptor>>()
            .map(|boxed| *boxed)
            .map_err(|_| ResolveError::TypeMismatch(key.type_name()))
    }

    /// Release the scope. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        match self.scope.take() {
            Some(scope) => {
                scope.release();
                trace!("resolution scope released");
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.scope.is_none()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.release();
    }
}
