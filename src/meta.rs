//! Route and parameter descriptors.
//!
//! These are the declarative attributes of the exposure surface: base-path /
//! sub-path / verb overrides, parameter source kinds, required flags, default
//! values, ignore flags and hook markers. They are built once, at controller
//! exposure time, as explicit configuration structs attached to registration
//! calls; no per-request introspection happens.

use http::Method;
use serde_json::Value;
use std::any::TypeId;

/// Identifies a bean type for `INJECT`-kind parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeanKey {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl BeanKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Strategy used to resolve one method argument from request data.
///
/// `Auto` defers to the fallback chain documented on
/// [`bind`](crate::binder::bind); `Path` is a reserved placeholder that never
/// materializes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamSource {
    #[default]
    Auto,
    Path,
    Parameter,
    Header,
    Inject,
    Session,
    Body,
}

/// Declared shape of a parameter or return value.
///
/// Data shapes (`Text` through `Json`) are converted from raw request strings
/// or body fields; capability shapes bind request-context facilities directly,
/// bypassing query/body parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    Text,
    Integer,
    Number,
    Flag,
    /// Epoch-millisecond timestamp; the zero epoch counts as missing.
    Date,
    List(Box<ParamType>),
    Map,
    /// Arbitrary structured value, taken as-is.
    Json,
    /// The request context itself; the handler already receives it, the bound
    /// argument is a marker.
    Context,
    Session,
    ParamMap,
    /// Raw body bytes.
    Input,
    /// The response output stream; written through the context.
    Output,
    Upload,
    Bean(BeanKey),
}

impl ParamType {
    /// Primitive-like scalars are converted from header text; anything else
    /// receives the raw string.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ParamType::Text
                | ParamType::Integer
                | ParamType::Number
                | ParamType::Flag
                | ParamType::Date
        )
    }

    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            ParamType::Context
                | ParamType::Session
                | ParamType::ParamMap
                | ParamType::Input
                | ParamType::Output
                | ParamType::Upload
                | ParamType::Bean(_)
        )
    }

    /// Whether a stored session value structurally matches this declared type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::Text => value.is_string(),
            ParamType::Integer | ParamType::Date => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Flag => value.is_boolean(),
            ParamType::List(_) => value.is_array(),
            ParamType::Map => value.is_object(),
            ParamType::Json => true,
            _ => false,
        }
    }

    /// Name used for session lookup when the stored value's shape does not
    /// match the declared type.
    pub fn lookup_name(&self) -> &'static str {
        match self {
            ParamType::Text => "text",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Flag => "flag",
            ParamType::Date => "date",
            ParamType::List(_) => "list",
            ParamType::Map => "map",
            ParamType::Json => "json",
            ParamType::Context => "context",
            ParamType::Session => "session",
            ParamType::ParamMap => "parammap",
            ParamType::Input => "input",
            ParamType::Output => "output",
            ParamType::Upload => "upload",
            ParamType::Bean(key) => key.type_name,
        }
    }
}

/// Descriptor for one method argument. Immutable once built.
#[derive(Debug, Clone)]
pub struct ParamMeta {
    pub name: String,
    pub ty: ParamType,
    pub source: ParamSource,
    pub required: bool,
    pub default_values: Vec<String>,
    pub ignore: bool,
}

impl ParamMeta {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            source: ParamSource::Auto,
            required: false,
            default_values: Vec::new(),
            ignore: false,
        }
    }

    /// Text parameter resolved from the query/form set (the common case).
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer)
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Flag)
    }

    /// Body-bound parameter; several body parameters on one action each read
    /// their named field out of the decoded document.
    pub fn body(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Json).source(ParamSource::Body)
    }

    pub fn header(name: impl Into<String>, ty: ParamType) -> Self {
        Self::new(name, ty).source(ParamSource::Header)
    }

    pub fn session(name: impl Into<String>, ty: ParamType) -> Self {
        Self::new(name, ty).source(ParamSource::Session)
    }

    /// Bean-injected parameter, resolved by type from the container.
    pub fn inject<T: 'static>(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Bean(BeanKey::of::<T>())).source(ParamSource::Inject)
    }

    pub fn source(mut self, source: ParamSource) -> Self {
        self.source = source;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_values.push(value.into());
        self
    }

    pub fn default_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn ignore(mut self) -> Self {
        self.ignore = true;
        self
    }
}

/// Marks an action as a routable method or a before/after-request hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookKind {
    #[default]
    Action,
    BeforeRequest,
    AfterRequest,
}

/// Method descriptor: name, overrides, ordered parameter descriptors and a
/// return-type descriptor. Derived once at exposure time and cached in the
/// route table.
#[derive(Debug, Clone)]
pub struct ActionMeta {
    pub name: String,
    /// Sub-path override; defaults to the lower-cased action name.
    pub sub_path: Option<String>,
    pub verb: Method,
    pub hook: HookKind,
    pub ignore: bool,
    pub params: Vec<ParamMeta>,
    /// Return-type descriptor used for output null-refinement.
    pub returns: ParamType,
}

impl ActionMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_path: None,
            verb: Method::GET,
            hook: HookKind::Action,
            ignore: false,
            params: Vec::new(),
            returns: ParamType::Json,
        }
    }

    /// Effective sub-path: the override when present, else the lower-cased
    /// action name.
    pub fn route_path(&self) -> String {
        self.sub_path
            .as_deref()
            .unwrap_or(&self.name)
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_path_defaults_to_lowercased_name() {
        let meta = ActionMeta::new("WorldPOST");
        assert_eq!(meta.route_path(), "worldpost");
    }

    #[test]
    fn route_path_prefers_override() {
        let mut meta = ActionMeta::new("worldPOST");
        meta.sub_path = Some("World".into());
        assert_eq!(meta.route_path(), "world");
    }

    #[test]
    fn session_type_match_is_structural() {
        assert!(ParamType::Text.accepts(&Value::String("x".into())));
        assert!(!ParamType::Text.accepts(&Value::from(1)));
        assert!(ParamType::Integer.accepts(&Value::from(1)));
        assert!(ParamType::Json.accepts(&Value::from(1)));
    }
}
