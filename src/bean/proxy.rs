//! Scoped bean proxies and invocation interception.
//!
//! A [`BeanProxy`] is the stable reference callers hold onto while the
//! concrete instance behind it is either shared (global scope) or private to
//! the calling thread (thread scope). Calls made through the proxy run the
//! container's interceptor chain around the real invocation.

use crate::error::{BeanCallError, BoxError, UnboundScopeError};
use dashmap::DashMap;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Fresh per-call mutable mapping, used by an interceptor's before-hook to
/// pass data to its own after-hook.
#[derive(Debug, Default)]
pub struct CallScope {
    values: HashMap<String, Value>,
}

impl CallScope {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }
}

/// Result view handed to after-hooks.
pub enum CallOutcome<'a> {
    Returned(&'a dyn Any),
    Failed(&'a BoxError),
}

impl CallOutcome<'_> {
    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failed(_))
    }
}

/// Before/after hook wrapped around every call through a proxied bean.
///
/// For interceptors `[A, B]` a call observes `A.before, B.before, <method>,
/// B.after, A.after`, also when the method fails. Errors raised by the
/// intercepted method propagate to the caller after all after-hooks ran.
pub trait BeanInterceptor: Send + Sync {
    /// Filter by bean type name; defaults to intercepting everything.
    fn applies_to(&self, _type_name: &str) -> bool {
        true
    }

    fn before(&self, _bean: &dyn Any, _method: &str, _args: &[Value], _scope: &mut CallScope) {}

    fn after(
        &self,
        _bean: &dyn Any,
        _method: &str,
        _args: &[Value],
        _outcome: CallOutcome<'_>,
        _elapsed: Duration,
        _scope: &mut CallScope,
    ) {
    }
}

type DefaultCtor<T> = Arc<dyn Fn() -> T + Send + Sync>;

enum ScopeCell<T> {
    Global(RwLock<Option<Arc<T>>>),
    Thread {
        slots: DashMap<ThreadId, Arc<T>>,
        default_ctor: Option<DefaultCtor<T>>,
    },
}

/// Forwarding wrapper around a scoped indirection cell plus the interceptor
/// chain. `get_bean`/`set_bean` is the shared contract of both variants.
pub struct BeanProxy<T: Any + Send + Sync> {
    type_name: &'static str,
    cell: ScopeCell<T>,
    interceptors: Vec<Arc<dyn BeanInterceptor>>,
}

impl<T: Any + Send + Sync> BeanProxy<T> {
    /// Proxy holding exactly one shared instance.
    pub fn global(interceptors: Vec<Arc<dyn BeanInterceptor>>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            cell: ScopeCell::Global(RwLock::new(None)),
            interceptors,
        }
    }

    /// Proxy holding one instance per calling thread.
    pub fn thread_local(interceptors: Vec<Arc<dyn BeanInterceptor>>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            cell: ScopeCell::Thread {
                slots: DashMap::new(),
                default_ctor: None,
            },
            interceptors,
        }
    }

    /// Configure a fallback constructor used when a thread calls through the
    /// proxy before binding its own instance.
    pub fn with_default(mut self, ctor: impl Fn() -> T + Send + Sync + 'static) -> Self {
        if let ScopeCell::Thread { default_ctor, .. } = &mut self.cell {
            *default_ctor = Some(Arc::new(ctor));
        }
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Bind an instance: into the shared slot (global) or into the calling
    /// thread's slot only (thread scope).
    pub fn set_bean(&self, bean: Arc<T>) {
        match &self.cell {
            ScopeCell::Global(slot) => {
                if let Ok(mut slot) = slot.write() {
                    *slot = Some(bean);
                }
            }
            ScopeCell::Thread { slots, .. } => {
                slots.insert(thread::current().id(), bean);
            }
        }
    }

    /// Drop the binding visible to the calling thread.
    pub fn clear_current(&self) {
        match &self.cell {
            ScopeCell::Global(slot) => {
                if let Ok(mut slot) = slot.write() {
                    *slot = None;
                }
            }
            ScopeCell::Thread { slots, .. } => {
                slots.remove(&thread::current().id());
            }
        }
    }

    /// Current instance without default-construction fallback.
    pub fn peek(&self) -> Option<Arc<T>> {
        match &self.cell {
            ScopeCell::Global(slot) => slot.read().ok()?.clone(),
            ScopeCell::Thread { slots, .. } => {
                slots.get(&thread::current().id()).map(|e| e.value().clone())
            }
        }
    }

    /// Instance the calling thread observes. An empty thread slot falls back
    /// to the configured default constructor (binding the constructed
    /// instance), else fails with [`UnboundScopeError`].
    pub fn get_bean(&self) -> Result<Arc<T>, UnboundScopeError> {
        match &self.cell {
            ScopeCell::Global(slot) => slot
                .read()
                .ok()
                .and_then(|s| s.clone())
                .ok_or(UnboundScopeError {
                    type_name: self.type_name,
                }),
            ScopeCell::Thread {
                slots,
                default_ctor,
            } => {
                let id = thread::current().id();
                if let Some(bean) = slots.get(&id) {
                    return Ok(bean.value().clone());
                }
                match default_ctor {
                    Some(ctor) => {
                        let bean = Arc::new(ctor());
                        slots.insert(id, bean.clone());
                        Ok(bean)
                    }
                    None => Err(UnboundScopeError {
                        type_name: self.type_name,
                    }),
                }
            }
        }
    }

    /// Forward a method call to the current instance through the interceptor
    /// chain.
    pub fn call<R: 'static>(
        &self,
        method: &str,
        args: &[Value],
        f: impl FnOnce(&T) -> Result<R, BoxError>,
    ) -> Result<R, BeanCallError> {
        let bean = self.get_bean()?;
        let applied: Vec<&Arc<dyn BeanInterceptor>> = self
            .interceptors
            .iter()
            .filter(|i| i.applies_to(self.type_name))
            .collect();

        let mut scope = CallScope::default();
        let bean_any: &dyn Any = &*bean;
        for interceptor in &applied {
            interceptor.before(bean_any, method, args, &mut scope);
        }

        let start = Instant::now();
        let result = f(&bean);
        let elapsed = start.elapsed();

        for interceptor in applied.iter().rev() {
            let outcome = match &result {
                Ok(value) => CallOutcome::Returned(value),
                Err(err) => CallOutcome::Failed(err),
            };
            interceptor.after(bean_any, method, args, outcome, elapsed, &mut scope);
        }

        result.map_err(BeanCallError::Invocation)
    }
}

/// Type-erased handle kept by the container for request-boundary hygiene and
/// `get`-by-type unwrapping.
pub(crate) trait ProxyHandle: Send + Sync {
    fn clear_current(&self);
    fn current_any(&self) -> Option<Arc<dyn Any + Send + Sync>>;
}

impl<T: Any + Send + Sync> ProxyHandle for BeanProxy<T> {
    fn clear_current(&self) {
        BeanProxy::clear_current(self);
    }

    fn current_any(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.peek().map(|b| b as Arc<dyn Any + Send + Sync>)
    }
}
