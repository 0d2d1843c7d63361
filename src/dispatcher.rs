//! Request dispatch state machine.
//!
//! One [`Dispatcher::handle`] call per request: negotiate the response
//! format, apply the CORS pre-check, short-circuit OPTIONS, reset thread
//! scope and bind the session, resolve controller and action, run before
//! hooks, bind parameters, invoke, refine the output, run after hooks and
//! serialize through the codec. Every failure funnels into the
//! exception handler, which produces the error body serialized the same way.

use crate::bean::BeanContext;
use crate::binder::bind_all;
use crate::codec::{negotiate, Codec, JsonCodec};
use crate::context::{MemorySessionStore, RequestContext, SessionStore};
use crate::error::HttpError;
use crate::meta::HookKind;
use crate::routes::{Controller, RouteEntry, RouteTable};
use http::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Maps a request failure to a structured error body, also deciding the
/// response status. Replaceable per dispatcher.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, ctx: &mut RequestContext, err: &HttpError) -> Value;
}

/// Default error body: `{"error": true, "msg": ..., "code": ...}`. A
/// non-positive code falls back to 500.
#[derive(Debug, Default)]
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn handle(&self, ctx: &mut RequestContext, err: &HttpError) -> Value {
        let code = if err.code > 0 {
            err.code
        } else {
            HttpError::INTERNAL_ERROR
        };
        if code >= 500 {
            error!(code, message = %err.message, "request failed");
        } else {
            warn!(code, message = %err.message, "request rejected");
        }
        ctx.set_status(code);
        json!({
            "error": true,
            "msg": err.message,
            "code": code,
        })
    }
}

/// Observes completed invocations; notified only when both controller and
/// action resolved.
pub trait DispatchListener: Send + Sync {
    fn invoke_result(&self, elapsed: Duration, controller: &str, action: &str, success: bool);
}

/// The engine: route table, bean container and collaborators wired together.
pub struct Dispatcher {
    routes: RouteTable,
    beans: Arc<BeanContext>,
    codec: Arc<dyn Codec>,
    sessions: Arc<dyn SessionStore>,
    exception_handler: Arc<dyn ExceptionHandler>,
    listener: Option<Arc<dyn DispatchListener>>,
    allowed_origins: Vec<String>,
}

impl Dispatcher {
    pub fn new(beans: Arc<BeanContext>) -> Self {
        Self {
            routes: RouteTable::new(),
            beans,
            codec: Arc::new(JsonCodec::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            exception_handler: Arc::new(DefaultExceptionHandler),
            listener: None,
            allowed_origins: Vec::new(),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn DispatchListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Allow cross-origin requests from `origin`; `*` allows any.
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    pub fn beans(&self) -> &Arc<BeanContext> {
        &self.beans
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Expose a controller: route its actions and register it as a bean.
    pub fn expose<C: Controller>(&mut self, controller: Arc<C>) {
        self.routes.expose(controller.clone());
        self.beans.add(controller);
    }

    pub fn expose_at<C: Controller>(&mut self, controller: Arc<C>, base: &str) {
        self.routes.expose_at(controller.clone(), base);
        self.beans.add(controller);
    }

    /// Handle one request against the context; the response lands in the
    /// context's status, headers and output buffer.
    pub fn handle(&self, ctx: &mut RequestContext) {
        let requested = ctx.params().get("format").map(str::to_string);
        let mime = negotiate(self.codec.as_ref(), requested.as_deref()).to_string();
        ctx.set_response_type(mime);

        if let Some(origin) = ctx.header("origin").map(str::to_string) {
            let allowed = self
                .allowed_origins
                .iter()
                .any(|o| o == "*" || o.eq_ignore_ascii_case(&origin));
            if allowed {
                ctx.set_header("Access-Control-Allow-Origin", origin);
                ctx.set_header("Access-Control-Allow-Headers", "origin, content-type, accept");
            }
        }

        if *ctx.method() == Method::OPTIONS {
            // Pre-flight: the CORS headers above are the whole response.
            ctx.flush();
            return;
        }

        // Worker threads are reused; nothing from the previous request may
        // leak into this one.
        self.beans.clear_thread_locals();
        let session = self.sessions.session(ctx);
        ctx.set_session(session.clone());
        self.beans.add_thread_local(Arc::new(session));

        match self.invoke_action(ctx) {
            Ok(Some(value)) => self.respond(ctx, &value),
            Ok(None) => {}
            Err(err) => {
                let body = self.exception_handler.handle(ctx, &err);
                self.respond(ctx, &body);
            }
        }
    }

    /// Resolve and invoke the target action, bracketed by the controller's
    /// before and after hooks. Returns `Ok(None)` when a handler claimed the
    /// response itself.
    fn invoke_action(&self, ctx: &mut RequestContext) -> Result<Option<Value>, HttpError> {
        let controller = self
            .routes
            .controller(ctx.path())
            .ok_or_else(HttpError::not_found)?;

        for hook in controller.hooks(HookKind::BeforeRequest) {
            self.run_hook(hook, ctx)?;
            if ctx.is_handled() || ctx.is_committed() {
                return Ok(None);
            }
        }

        let route = self
            .routes
            .action(ctx.path(), ctx.method())
            .ok_or_else(HttpError::not_found)?;

        let start = Instant::now();
        let result: Result<Value, HttpError> = (|| {
            let args = bind_all(ctx, &route.meta.params, &self.beans, self.codec.as_ref())?;
            let value = route.invoke(ctx, args)?;
            let value = crate::binder::refine(&route.meta.returns, value);
            for hook in controller.hooks(HookKind::AfterRequest) {
                self.run_hook(hook, ctx)?;
            }
            Ok(value)
        })();
        let elapsed = start.elapsed();

        if let Some(listener) = &self.listener {
            listener.invoke_result(elapsed, &route.controller, &route.meta.name, result.is_ok());
        }
        debug!(
            controller = %route.controller,
            action = %route.meta.name,
            elapsed_ms = elapsed.as_millis() as u64,
            ok = result.is_ok(),
            "action invoked"
        );

        let value = result?;
        if ctx.is_handled() || ctx.is_committed() {
            return Ok(None);
        }
        Ok(Some(value))
    }

    fn run_hook(&self, hook: &RouteEntry, ctx: &mut RequestContext) -> Result<(), HttpError> {
        let args = bind_all(ctx, &hook.meta.params, &self.beans, self.codec.as_ref())?;
        hook.invoke(ctx, args)?;
        Ok(())
    }

    /// Serialize a response value through the codec into the context's
    /// buffer. Skipped when the response was already committed or a handler
    /// claimed it.
    fn respond(&self, ctx: &mut RequestContext, value: &Value) {
        if ctx.is_committed() || ctx.is_handled() {
            return;
        }
        let mime = ctx
            .response_type()
            .unwrap_or(JsonCodec::MIME)
            .to_string();
        ctx.set_header("Content-Type", mime.clone());
        let mut buf = Vec::new();
        match self.codec.write(&mut buf, &mime, value) {
            Ok(()) => {
                ctx.write(&buf);
                ctx.flush();
            }
            Err(err) => {
                error!(%err, "response encoding failed");
                ctx.set_status(HttpError::INTERNAL_ERROR);
                ctx.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bean::Bean;
    use crate::meta::ParamMeta;
    use crate::routes::Action;

    struct Hallo;
    impl Bean for Hallo {}
    impl Controller for Hallo {
        fn actions() -> Vec<Action<Self>> {
            vec![
                Action::get("world", |_, _, args| {
                    Ok(json!(format!("Hello {}", args.str(0))))
                })
                .param(ParamMeta::text("name").default_value("world")),
                Action::get("strict", |_, _, args| Ok(json!(args.str(0))))
                    .param(ParamMeta::text("name").required()),
                Action::get("boom", |_, _, _| {
                    Err(HttpError::new(500, "kaput"))
                }),
            ]
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new(BeanContext::new());
        d.expose(Arc::new(Hallo));
        d
    }

    #[test]
    fn round_trip_with_default_parameter() {
        let d = dispatcher();
        let mut ctx = RequestContext::new(Method::GET, "/hallo/world");
        d.handle(&mut ctx);
        assert_eq!(ctx.status(), 200);
        assert_eq!(ctx.output(), br#""Hello world""#);
        assert_eq!(ctx.response_header("content-type"), Some("application/json"));
        assert!(ctx.is_committed());
    }

    #[test]
    fn query_parameter_overrides_default() {
        let d = dispatcher();
        let mut ctx = RequestContext::new(Method::GET, "/hallo/world?name=gantry");
        d.handle(&mut ctx);
        assert_eq!(ctx.output(), br#""Hello gantry""#);
    }

    #[test]
    fn unknown_route_is_a_404_body() {
        let d = dispatcher();
        let mut ctx = RequestContext::new(Method::GET, "/nope/world");
        d.handle(&mut ctx);
        assert_eq!(ctx.status(), 404);
        let body: Value = serde_json::from_slice(ctx.output()).unwrap();
        assert_eq!(body["error"], json!(true));
        assert_eq!(body["code"], json!(404));
    }

    #[test]
    fn missing_required_parameter_is_a_400_naming_it() {
        let d = dispatcher();
        let mut ctx = RequestContext::new(Method::GET, "/hallo/strict");
        d.handle(&mut ctx);
        assert_eq!(ctx.status(), 400);
        let body: Value = serde_json::from_slice(ctx.output()).unwrap();
        assert!(body["msg"].as_str().unwrap().contains("name"));
    }

    #[test]
    fn handler_error_becomes_error_body() {
        let d = dispatcher();
        let mut ctx = RequestContext::new(Method::GET, "/hallo/boom");
        d.handle(&mut ctx);
        assert_eq!(ctx.status(), 500);
        let body: Value = serde_json::from_slice(ctx.output()).unwrap();
        assert_eq!(body["msg"], json!("kaput"));
    }

    #[test]
    fn options_short_circuits_with_cors_headers() {
        let d = Dispatcher::new(BeanContext::new()).allow_origin("http://app.example");
        let mut ctx = RequestContext::new(Method::OPTIONS, "/hallo/world")
            .with_header("Origin", "http://app.example");
        d.handle(&mut ctx);
        assert!(ctx.is_committed());
        assert!(ctx.output().is_empty());
        assert_eq!(
            ctx.response_header("access-control-allow-origin"),
            Some("http://app.example")
        );
        assert_eq!(
            ctx.response_header("access-control-allow-headers"),
            Some("origin, content-type, accept")
        );
    }

    #[test]
    fn disallowed_origin_gets_no_cors_headers() {
        let d = Dispatcher::new(BeanContext::new()).allow_origin("http://app.example");
        let mut ctx = RequestContext::new(Method::GET, "/hallo/world")
            .with_header("Origin", "http://evil.example");
        d.handle(&mut ctx);
        assert_eq!(ctx.response_header("access-control-allow-origin"), None);
    }
}
