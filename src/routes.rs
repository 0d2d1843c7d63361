//! Controllers, action descriptors and the route table.
//!
//! A controller is a bean that publishes a list of [`Action`] descriptors.
//! Exposure folds those descriptors into the [`RouteTable`], keyed by
//! base-path, then sub-path, then verb. Lookups are exact and
//! case-insensitive; registering the same `(base, sub, verb)` twice silently
//! replaces the earlier binding.

use crate::binder::Args;
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::meta::{ActionMeta, HookKind, ParamMeta, ParamType};
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A bean that exposes routable actions.
pub trait Controller: crate::bean::Bean {
    /// Route-table name; the default base path is this, lower-cased.
    fn name(&self) -> &'static str
    where
        Self: Sized,
    {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Base-path override; `None` maps the controller under its name.
    fn base_path(&self) -> Option<&str> {
        None
    }

    /// The controller's action descriptors, in declaration order.
    fn actions() -> Vec<Action<Self>>
    where
        Self: Sized;
}

type Handler<C> = Arc<dyn Fn(&C, &mut RequestContext, Args) -> Result<Value, HttpError> + Send + Sync>;

/// One exposed method: its descriptor plus the typed handler closure.
pub struct Action<C> {
    pub meta: ActionMeta,
    handler: Handler<C>,
}

impl<C> Clone for Action<C> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<C: Controller> Action<C> {
    pub fn new(
        name: impl Into<String>,
        handler: impl Fn(&C, &mut RequestContext, Args) -> Result<Value, HttpError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            meta: ActionMeta::new(name),
            handler: Arc::new(handler),
        }
    }

    pub fn get(
        name: impl Into<String>,
        handler: impl Fn(&C, &mut RequestContext, Args) -> Result<Value, HttpError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(name, handler)
    }

    pub fn post(
        name: impl Into<String>,
        handler: impl Fn(&C, &mut RequestContext, Args) -> Result<Value, HttpError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(name, handler).verb(Method::POST)
    }

    pub fn put(
        name: impl Into<String>,
        handler: impl Fn(&C, &mut RequestContext, Args) -> Result<Value, HttpError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(name, handler).verb(Method::PUT)
    }

    pub fn delete(
        name: impl Into<String>,
        handler: impl Fn(&C, &mut RequestContext, Args) -> Result<Value, HttpError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(name, handler).verb(Method::DELETE)
    }

    /// Sub-path override, replacing the lower-cased action name.
    pub fn sub_path(mut self, path: impl Into<String>) -> Self {
        self.meta.sub_path = Some(path.into());
        self
    }

    pub fn verb(mut self, verb: Method) -> Self {
        self.meta.verb = verb;
        self
    }

    pub fn param(mut self, param: ParamMeta) -> Self {
        self.meta.params.push(param);
        self
    }

    pub fn params<I: IntoIterator<Item = ParamMeta>>(mut self, params: I) -> Self {
        self.meta.params.extend(params);
        self
    }

    pub fn returns(mut self, ty: ParamType) -> Self {
        self.meta.returns = ty;
        self
    }

    /// Run before every request handled by this controller instead of being
    /// routed by path.
    pub fn before_hook(mut self) -> Self {
        self.meta.hook = HookKind::BeforeRequest;
        self
    }

    pub fn after_hook(mut self) -> Self {
        self.meta.hook = HookKind::AfterRequest;
        self
    }

    /// Exclude from exposure entirely.
    pub fn ignore(mut self) -> Self {
        self.meta.ignore = true;
        self
    }
}

type ActionFn = Arc<dyn Fn(&mut RequestContext, Args) -> Result<Value, HttpError> + Send + Sync>;

/// A registered action bound to its controller instance.
pub struct RouteEntry {
    /// Owning controller's name, for diagnostics.
    pub controller: String,
    pub meta: ActionMeta,
    invoke: ActionFn,
}

impl RouteEntry {
    pub fn invoke(&self, ctx: &mut RequestContext, args: Args) -> Result<Value, HttpError> {
        (self.invoke)(ctx, args)
    }
}

/// All routes registered under one base path.
#[derive(Default)]
pub struct ControllerEntry {
    pub name: String,
    hooks: Vec<RouteEntry>,
    actions: HashMap<String, HashMap<Method, RouteEntry>>,
}

impl ControllerEntry {
    /// Hooks of one kind, in declaration order.
    pub fn hooks<'a>(&'a self, kind: HookKind) -> impl Iterator<Item = &'a RouteEntry> + 'a {
        self.hooks.iter().filter(move |h| h.meta.hook == kind)
    }

    pub fn action(&self, sub_path: &str, verb: &Method) -> Option<&RouteEntry> {
        self.actions.get(sub_path)?.get(verb)
    }
}

/// Exact-match route table: base-path to controller entry to sub-path to verb.
#[derive(Default)]
pub struct RouteTable {
    controllers: HashMap<String, ControllerEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose a controller under its default base path.
    pub fn expose<C: Controller>(&mut self, controller: Arc<C>) {
        let base = controller
            .base_path()
            .map(str::to_string)
            .unwrap_or_else(|| controller.name().to_lowercase());
        self.expose_at(controller, &base);
    }

    /// Expose a controller under an explicit base path. Re-exposing a base
    /// path merges into the existing entry, overwriting colliding routes.
    pub fn expose_at<C: Controller>(&mut self, controller: Arc<C>, base: &str) {
        let base = base.trim_matches('/').to_lowercase();
        let entry = self.controllers.entry(base.clone()).or_default();
        entry.name = controller.name().to_string();

        for action in C::actions() {
            if action.meta.ignore {
                debug!(
                    controller = controller.name(),
                    action = %action.meta.name,
                    "skipping ignored action"
                );
                continue;
            }
            let instance = controller.clone();
            let handler = action.handler.clone();
            let route = RouteEntry {
                controller: controller.name().to_string(),
                meta: action.meta.clone(),
                invoke: Arc::new(move |ctx, args| handler(&instance, ctx, args)),
            };
            match action.meta.hook {
                HookKind::Action => {
                    let sub = action.meta.route_path();
                    info!(
                        verb = %action.meta.verb,
                        path = format!("/{base}/{sub}"),
                        target = format!("{}::{}", controller.name(), action.meta.name),
                        "mapped route"
                    );
                    entry
                        .actions
                        .entry(sub)
                        .or_default()
                        .insert(action.meta.verb.clone(), route);
                }
                HookKind::BeforeRequest | HookKind::AfterRequest => {
                    entry.hooks.push(route);
                }
            }
        }
    }

    /// Controller owning a request path; the base is the first path segment,
    /// matched case-insensitively.
    pub fn controller(&self, path: &str) -> Option<&ControllerEntry> {
        let path = path.trim_start_matches('/');
        let base = path.split('/').next()?;
        self.controllers.get(&base.to_lowercase())
    }

    /// Action for a full request path and verb. The path must carry a
    /// separator between base and sub-path; a bare base path never routes.
    pub fn action(&self, path: &str, verb: &Method) -> Option<&RouteEntry> {
        let path = path.trim_start_matches('/');
        let (base, sub) = path.split_once('/')?;
        if base.is_empty() {
            return None;
        }
        let sub = sub.trim_end_matches('/').to_lowercase();
        self.controllers
            .get(&base.to_lowercase())?
            .action(&sub, verb)
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bean::Bean;
    use serde_json::json;

    struct Hallo;

    impl Bean for Hallo {}

    impl Controller for Hallo {
        fn actions() -> Vec<Action<Self>> {
            vec![
                Action::get("world", |_, _, args| {
                    Ok(json!(format!("Hello {}", args.str(0))))
                })
                .param(ParamMeta::text("name").default_value("world")),
                Action::post("worldPOST", |_, _, _| Ok(json!("posted"))).sub_path("world"),
                Action::get("secret", |_, _, _| Ok(Value::Null)).ignore(),
                Action::new("audit", |_, _, _| Ok(Value::Null)).before_hook(),
            ]
        }
    }

    fn table() -> RouteTable {
        let mut table = RouteTable::new();
        table.expose(Arc::new(Hallo));
        table
    }

    #[test]
    fn default_base_is_lowercased_type_name() {
        let table = table();
        assert!(table.controller("/hallo/world").is_some());
        assert!(table.controller("/HALLO/world").is_some());
        assert!(table.controller("/other/world").is_none());
    }

    #[test]
    fn same_sub_path_routes_by_verb() {
        let table = table();
        let get = table.action("/hallo/world", &Method::GET).unwrap();
        let post = table.action("/hallo/world", &Method::POST).unwrap();
        assert_eq!(get.meta.name, "world");
        assert_eq!(post.meta.name, "worldPOST");
        assert!(table.action("/hallo/world", &Method::DELETE).is_none());
    }

    #[test]
    fn lookup_is_case_insensitive_and_tolerates_trailing_slash() {
        let table = table();
        assert!(table.action("/Hallo/World", &Method::GET).is_some());
        assert!(table.action("/hallo/world/", &Method::GET).is_some());
    }

    #[test]
    fn bare_base_path_never_routes() {
        let table = table();
        assert!(table.action("/hallo", &Method::GET).is_none());
        assert!(table.action("/hallo/", &Method::GET).is_none());
    }

    #[test]
    fn ignored_actions_are_not_exposed() {
        let table = table();
        assert!(table.action("/hallo/secret", &Method::GET).is_none());
    }

    #[test]
    fn hooks_are_kept_apart_from_routes() {
        let table = table();
        let ctrl = table.controller("/hallo/world").unwrap();
        let before: Vec<_> = ctrl.hooks(HookKind::BeforeRequest).collect();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].meta.name, "audit");
        assert!(table.action("/hallo/audit", &Method::GET).is_none());
    }

    #[test]
    fn duplicate_registration_overwrites() {
        struct First;
        impl Bean for First {}
        impl Controller for First {
            fn actions() -> Vec<Action<Self>> {
                vec![Action::get("m", |_, _, _| Ok(json!("first")))]
            }
        }
        struct Second;
        impl Bean for Second {}
        impl Controller for Second {
            fn actions() -> Vec<Action<Self>> {
                vec![Action::get("m", |_, _, _| Ok(json!("second")))]
            }
        }

        let mut table = RouteTable::new();
        table.expose_at(Arc::new(First), "api");
        table.expose_at(Arc::new(Second), "api");
        let route = table.action("/api/m", &Method::GET).unwrap();
        let mut ctx = RequestContext::new(Method::GET, "/api/m");
        assert_eq!(route.invoke(&mut ctx, Args::default()).unwrap(), json!("second"));
    }
}
