//! Bean container: registry of singleton and thread-scoped instances with
//! best-effort dependency injection and lifecycle hooks.
//!
//! Registration happens during application startup; the registries are backed
//! by concurrent maps so in-flight reads stay safe while late registrations
//! land. Thread-scoped beans are registered behind a [`BeanProxy`] keyed by
//! the bean's type; every calling thread binds its own instance into the
//! proxy before use.

mod proxy;

pub use proxy::{BeanInterceptor, BeanProxy, CallOutcome, CallScope};

use dashmap::DashMap;
use proxy::ProxyHandle;
use std::any::{Any, TypeId};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{debug, warn};

/// A managed instance: eligible for dependency injection and lifecycle hooks.
///
/// Injection is declared by overriding [`Bean::inject`], typically one
/// [`BeanContext::wire`] call per [`Dep`] slot. All hooks default to no-ops so
/// plain beans implement the trait with an empty block.
pub trait Bean: Any + Send + Sync {
    /// Resolve this bean's dependency slots against the container, returning
    /// the slots that could not be resolved.
    fn inject(&self, _beans: &BeanContext) -> Vec<UnresolvedDependency> {
        Vec::new()
    }

    /// Called right after registration; only the container itself is
    /// guaranteed available at this point.
    fn after_add(&self, _beans: &BeanContext) {}

    /// Called once every one of this bean's own dependency slots resolved.
    /// Injection order relative to other beans is unspecified.
    fn after_inject(&self) {}
}

/// A dependency slot that could not be resolved during [`BeanContext::try_inject`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDependency {
    pub field: &'static str,
    pub type_name: &'static str,
}

/// Write-once injection slot held by a bean for each wired dependency.
///
/// An already-populated slot is skipped by [`BeanContext::wire`], so beans may
/// pre-seed slots (e.g. in tests) and injection will not overwrite them.
pub struct Dep<T> {
    id: &'static str,
    slot: OnceLock<Arc<T>>,
}

impl<T> Dep<T> {
    /// `id` is the slot name; the container tries an id lookup before falling
    /// back to a type lookup, like field-name-first injection.
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            slot: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.get().cloned()
    }

    /// Populate the slot; returns false when it was already set.
    pub fn set(&self, bean: Arc<T>) -> bool {
        self.slot.set(bean).is_ok()
    }
}

impl<T> std::fmt::Debug for Dep<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("set", &self.slot.get().is_some())
            .finish()
    }
}

struct BeanEntry {
    any: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

struct ProxyEntry {
    any: Arc<dyn Any + Send + Sync>,
    handle: Arc<dyn ProxyHandle>,
}

/// Registry of singleton and thread-scoped beans.
pub struct BeanContext {
    beans: DashMap<TypeId, BeanEntry>,
    beans_by_id: DashMap<String, Arc<dyn Any + Send + Sync>>,
    proxies: DashMap<TypeId, ProxyEntry>,
    interceptors: RwLock<Vec<Arc<dyn BeanInterceptor>>>,
}

impl Bean for BeanContext {}

impl BeanContext {
    /// Create a container; the container registers itself so beans can wire a
    /// reference to it.
    pub fn new() -> Arc<Self> {
        let ctx = Arc::new(Self {
            beans: DashMap::new(),
            beans_by_id: DashMap::new(),
            proxies: DashMap::new(),
            interceptors: RwLock::new(Vec::new()),
        });
        ctx.beans.insert(
            TypeId::of::<BeanContext>(),
            BeanEntry {
                any: ctx.clone(),
                type_name: std::any::type_name::<BeanContext>(),
            },
        );
        ctx
    }

    /// Register a global bean under its own type and immediately run
    /// injection on it.
    pub fn add<T: Bean>(&self, bean: Arc<T>) -> Vec<UnresolvedDependency> {
        self.beans.insert(
            TypeId::of::<T>(),
            BeanEntry {
                any: bean.clone(),
                type_name: std::any::type_name::<T>(),
            },
        );
        debug!(bean = std::any::type_name::<T>(), "registered bean");
        bean.after_add(self);
        self.try_inject(bean.as_ref())
    }

    /// Register under a string id as well as the type key.
    pub fn add_with_id<T: Bean>(&self, id: impl Into<String>, bean: Arc<T>) -> Vec<UnresolvedDependency> {
        self.beans_by_id.insert(id.into(), bean.clone());
        self.add(bean)
    }

    /// Look up a bean by type. For a thread-scoped type this unwraps to the
    /// calling thread's current instance, if one is bound.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        if let Some(entry) = self.beans.get(&TypeId::of::<T>()) {
            return entry.any.clone().downcast::<T>().ok();
        }
        self.proxies
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.handle.current_any())
            .and_then(|any| any.downcast::<T>().ok())
    }

    pub fn get_by_id<T: Any + Send + Sync>(&self, id: &str) -> Option<Arc<T>> {
        self.beans_by_id
            .get(id)
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Type-erased lookup used by INJECT-kind parameter binding. Thread-scoped
    /// types resolve to their proxy, the stable reference callers hold.
    pub fn get_any(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        if let Some(entry) = self.beans.get(&type_id) {
            return Some(entry.any.clone());
        }
        self.proxies.get(&type_id).map(|entry| entry.any.clone())
    }

    /// Best-effort injection: resolves the target's dependency slots, logs a
    /// warning per unresolved slot and reports them back. Injection failures
    /// are non-fatal since many slots are legitimately optional. The
    /// after-inject hook fires only when every slot resolved.
    pub fn try_inject(&self, target: &dyn Bean) -> Vec<UnresolvedDependency> {
        let unresolved = target.inject(self);
        for dep in &unresolved {
            warn!(
                field = dep.field,
                r#type = dep.type_name,
                "no bean registered for injected dependency"
            );
        }
        if unresolved.is_empty() {
            target.after_inject();
        }
        unresolved
    }

    /// Resolve one injection slot: skip when already set, else id lookup
    /// first, then type lookup.
    pub fn wire<T: Any + Send + Sync>(&self, dep: &Dep<T>) -> Option<UnresolvedDependency> {
        if dep.get().is_some() {
            return None;
        }
        let bean = self
            .get_by_id::<T>(dep.id())
            .or_else(|| self.get::<T>());
        match bean {
            Some(bean) => {
                let _ = dep.set(bean);
                None
            }
            None => Some(UnresolvedDependency {
                field: dep.id(),
                type_name: std::any::type_name::<T>(),
            }),
        }
    }

    /// Ordered interceptor chain applied to every proxy created afterwards.
    pub fn add_interceptor(&self, interceptor: Arc<dyn BeanInterceptor>) {
        if let Ok(mut chain) = self.interceptors.write() {
            chain.push(interceptor);
        }
    }

    fn interceptor_chain(&self) -> Vec<Arc<dyn BeanInterceptor>> {
        self.interceptors
            .read()
            .map(|chain| chain.clone())
            .unwrap_or_default()
    }

    /// The thread-scope proxy for `T`, created on first use. The proxy is also
    /// registered as a regular bean so `Dep<BeanProxy<T>>` slots can wire it.
    pub fn thread_proxy<T: Any + Send + Sync>(&self) -> Arc<BeanProxy<T>> {
        self.thread_proxy_inner(None)
    }

    /// Like [`thread_proxy`](Self::thread_proxy) but configures a fallback
    /// constructor for threads that call through before binding an instance.
    /// The default applies only when the proxy is first created.
    pub fn thread_proxy_with_default<T: Any + Send + Sync>(
        &self,
        ctor: impl Fn() -> T + Send + Sync + 'static,
    ) -> Arc<BeanProxy<T>> {
        self.thread_proxy_inner(Some(Box::new(ctor)))
    }

    #[allow(clippy::type_complexity)]
    fn thread_proxy_inner<T: Any + Send + Sync>(
        &self,
        ctor: Option<Box<dyn Fn() -> T + Send + Sync>>,
    ) -> Arc<BeanProxy<T>> {
        let entry = self.proxies.entry(TypeId::of::<T>()).or_insert_with(|| {
            let mut proxy = BeanProxy::<T>::thread_local(self.interceptor_chain());
            if let Some(ctor) = ctor {
                proxy = proxy.with_default(move || ctor());
            }
            let proxy = Arc::new(proxy);
            self.beans.insert(
                TypeId::of::<BeanProxy<T>>(),
                BeanEntry {
                    any: proxy.clone(),
                    type_name: std::any::type_name::<BeanProxy<T>>(),
                },
            );
            ProxyEntry {
                any: proxy.clone(),
                handle: proxy,
            }
        });
        // The entry was created with a BeanProxy<T>, so the downcast holds.
        entry
            .any
            .clone()
            .downcast::<BeanProxy<T>>()
            .unwrap_or_else(|_| unreachable!("proxy registered under foreign type"))
    }

    /// Bind a thread-scoped instance for the calling thread only, creating
    /// the proxy when this type was not yet thread-scope registered.
    pub fn add_thread_local<T: Any + Send + Sync>(&self, bean: Arc<T>) {
        self.thread_proxy::<T>().set_bean(bean);
    }

    /// Drop every thread-scoped binding visible to the calling thread.
    /// Invoked at request boundaries so reused worker threads never leak
    /// state across requests.
    pub fn clear_thread_locals(&self) {
        for entry in self.proxies.iter() {
            entry.handle.clear_current();
        }
    }

    /// Registered bean type names, for diagnostics.
    pub fn bean_names(&self) -> Vec<&'static str> {
        self.beans.iter().map(|e| e.type_name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Config {
        url: String,
    }
    impl Bean for Config {}

    struct Repo {
        config: Dep<Config>,
    }

    impl Bean for Repo {
        fn inject(&self, beans: &BeanContext) -> Vec<UnresolvedDependency> {
            beans.wire(&self.config).into_iter().collect()
        }
    }

    #[test]
    fn add_registers_and_injects() {
        let beans = BeanContext::new();
        beans.add(Arc::new(Config { url: "db://x".into() }));

        let repo = Arc::new(Repo { config: Dep::new("config") });
        let unresolved = beans.add(repo.clone());
        assert!(unresolved.is_empty());
        assert_eq!(repo.config.get().unwrap().url, "db://x");
    }

    #[test]
    fn missing_dependency_is_reported_not_fatal() {
        let beans = BeanContext::new();
        let repo = Arc::new(Repo { config: Dep::new("config") });
        let unresolved = beans.add(repo.clone());
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].field, "config");
        assert!(repo.config.get().is_none());
    }

    #[test]
    fn preset_slot_is_skipped() {
        let beans = BeanContext::new();
        beans.add(Arc::new(Config { url: "db://registered".into() }));

        let repo = Repo { config: Dep::new("config") };
        repo.config.set(Arc::new(Config { url: "db://preset".into() }));
        assert!(beans.try_inject(&repo).is_empty());
        assert_eq!(repo.config.get().unwrap().url, "db://preset");
    }

    #[test]
    fn id_lookup_wins_over_type_lookup() {
        let beans = BeanContext::new();
        beans.add(Arc::new(Config { url: "db://by-type".into() }));
        beans.add_with_id("config", Arc::new(Config { url: "db://by-id".into() }));

        let repo = Repo { config: Dep::new("config") };
        beans.try_inject(&repo);
        assert_eq!(repo.config.get().unwrap().url, "db://by-id");
    }

    #[test]
    fn container_registers_itself() {
        let beans = BeanContext::new();
        assert!(beans.get::<BeanContext>().is_some());
    }

    #[test]
    fn get_unwraps_thread_scoped_instance() {
        let beans = BeanContext::new();
        assert!(beans.get::<Config>().is_none());
        beans.add_thread_local(Arc::new(Config { url: "db://local".into() }));
        assert_eq!(beans.get::<Config>().unwrap().url, "db://local");
        beans.clear_thread_locals();
        assert!(beans.get::<Config>().is_none());
    }
}
