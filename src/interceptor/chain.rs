use std::future::Future;
use std::sync::Arc;

use tracing::{trace, warn};

use super::{HookPoint, InboundInterceptor, InterceptContext, InterceptorTier};
use crate::handler::{catch_panic, HandlerError};

struct Link {
    tier: InterceptorTier,
    name: &'static str,
    interceptor: Arc<dyn InboundInterceptor>,
}

/// A hook failure that did not become the invocation's outcome.
#[derive(Debug, Clone)]
pub struct HookFailure {
    pub interceptor: &'static str,
    pub hook: HookPoint,
    pub error: HandlerError,
}

/// Result of running a handler through its interceptor chain.
#[derive(Debug)]
pub struct ChainOutcome<T = ()> {
    /// The handler's output once every success hook passed, or the first
    /// failure.
    pub result: Result<T, HandlerError>,
    /// Error hook failures swallowed while reporting `result`.
    pub suppressed: Vec<HookFailure>,
}

/// Ordered interceptors for one handler invocation, outermost first.
#[derive(Default)]
pub struct InterceptorChain {
    links: Vec<Link>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor. Tiers must be pushed global, class, method.
    pub fn push(
        &mut self,
        tier: InterceptorTier,
        name: &'static str,
        interceptor: Arc<dyn InboundInterceptor>,
    ) {
        self.links.push(Link {
            tier,
            name,
            interceptor,
        });
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Interceptor type names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.links.iter().map(|link| link.name).collect()
    }

    /// Run `handler` inside the chain.
    ///
    /// Executing hooks run outermost first and the handler only runs if all
    /// of them succeed. Success hooks then run innermost first. On any
    /// failure every interceptor's error hook runs, innermost first, and the
    /// first failure is returned unchanged. The handler's output is returned
    /// only once every success hook has passed.
    pub async fn run<T, F, Fut>(&self, ctx: &InterceptContext<'_>, handler: F) -> ChainOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        if self.links.is_empty() {
            return ChainOutcome {
                result: catch_panic(handler()).await,
                suppressed: Vec::new(),
            };
        }

        let error = match self.run_to_success(ctx, handler).await {
            Ok(output) => {
                return ChainOutcome {
                    result: Ok(output),
                    suppressed: Vec::new(),
                }
            }
            Err(error) => error,
        };

        let mut suppressed = Vec::new();
        for link in self.links.iter().rev() {
            let hook = catch_panic(link.interceptor.on_handler_error(ctx, &error)).await;
            if let Err(hook_error) = hook {
                warn!(
                    interceptor = link.name,
                    tier = ?link.tier,
                    error = %hook_error,
                    "error hook failed; keeping original error"
                );
                suppressed.push(HookFailure {
                    interceptor: link.name,
                    hook: HookPoint::Error,
                    error: hook_error,
                });
            }
        }

        ChainOutcome {
            result: Err(error),
            suppressed,
        }
    }

    async fn run_to_success<T, F, Fut>(
        &self,
        ctx: &InterceptContext<'_>,
        handler: F,
    ) -> Result<T, HandlerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        for link in &self.links {
            trace!(interceptor = link.name, hook = %HookPoint::Executing);
            catch_panic(link.interceptor.on_handler_executing(ctx)).await?;
        }

        let output = catch_panic(handler()).await?;

        for link in self.links.iter().rev() {
            trace!(interceptor = link.name, hook = %HookPoint::Success);
            catch_panic(link.interceptor.on_handler_success(ctx)).await?;
        }
        Ok(output)
    }
}
