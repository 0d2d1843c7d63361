//! # Gantry
//!
//! **Gantry** is an embeddable HTTP service core: a request dispatch engine
//! paired with a dependency-injection bean container. The embedding transport
//! parses the wire protocol, builds one [`context::RequestContext`] per
//! request and hands it to [`dispatcher::Dispatcher::handle`]; everything
//! between that call and the filled response buffer lives here.
//!
//! ## Architecture
//!
//! - **[`routes`]** - Controllers, action descriptors and the exact-match
//!   route table (base-path / sub-path / verb)
//! - **[`binder`]** - Parameter binding: query, header, body, session and
//!   bean-injected arguments with null-refinement and requiredness checks
//! - **[`bean`]** - The container: singleton and thread-scoped beans, wiring
//!   slots, lifecycle hooks and invocation interceptors
//! - **[`dispatcher`]** - The per-request state machine tying it together
//! - **[`codec`]** - Pluggable body/response serialization (JSON built in)
//! - **[`context`]** - Request context, query parameters, sessions, uploads
//! - **[`meta`]** - Declarative descriptors for actions and parameters
//! - **[`error`]** - [`error::HttpError`] and friends
//!
//! ## Example
//!
//! ```
//! use gantry::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Hallo;
//!
//! impl Bean for Hallo {}
//!
//! impl Controller for Hallo {
//!     fn actions() -> Vec<Action<Self>> {
//!         vec![Action::get("world", |_, _, args| {
//!             Ok(json!(format!("Hello {}", args.str(0))))
//!         })
//!         .param(ParamMeta::text("name").default_value("world"))]
//!     }
//! }
//!
//! let mut dispatcher = Dispatcher::new(BeanContext::new());
//! dispatcher.expose(Arc::new(Hallo));
//!
//! let mut ctx = RequestContext::new(http::Method::GET, "/hallo/world?name=gantry");
//! dispatcher.handle(&mut ctx);
//! assert_eq!(ctx.output(), br#""Hello gantry""#);
//! ```

pub mod bean;
pub mod binder;
pub mod codec;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod meta;
pub mod routes;

/// The types most embeddings need, in one import.
pub mod prelude {
    pub use crate::bean::{Bean, BeanContext, BeanInterceptor, BeanProxy, Dep};
    pub use crate::binder::{Args, BoundArg};
    pub use crate::codec::{Codec, JsonCodec};
    pub use crate::context::{ParamMap, RequestContext, Session, SessionStore};
    pub use crate::dispatcher::{DispatchListener, Dispatcher, ExceptionHandler};
    pub use crate::error::HttpError;
    pub use crate::meta::{ActionMeta, HookKind, ParamMeta, ParamSource, ParamType};
    pub use crate::routes::{Action, Controller, RouteTable};
}
