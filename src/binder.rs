//! Parameter binder: turns a request context plus a parameter descriptor into
//! a typed argument.
//!
//! Non-body parameters bind one by one; BODY-kind parameters share a single
//! batched body read. After binding, a null-refinement pass substitutes
//! canonical empty values for known container-like types, and required
//! parameters that are still "missing" fail the request with a 400.

use crate::bean::BeanContext;
use crate::codec::Codec;
use crate::context::{ParamMap, RequestContext, Session, UploadedFile};
use crate::error::HttpError;
use crate::meta::{ParamMeta, ParamSource, ParamType};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

/// One bound method argument.
///
/// Data parameters carry a [`Value`]; capability parameters carry the bound
/// request facility directly.
#[derive(Clone)]
pub enum BoundArg {
    Value(Value),
    Bean(Arc<dyn Any + Send + Sync>),
    Session(Session),
    Params(ParamMap),
    Upload(UploadedFile),
    /// Raw request body bytes.
    Input(Vec<u8>),
    /// Marker: the handler writes through the context's output.
    Output,
    /// Marker: the handler reads the context it already receives.
    Context,
}

impl std::fmt::Debug for BoundArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundArg::Value(v) => write!(f, "Value({v})"),
            BoundArg::Bean(_) => write!(f, "Bean"),
            BoundArg::Session(_) => write!(f, "Session"),
            BoundArg::Params(_) => write!(f, "Params"),
            BoundArg::Upload(u) => write!(f, "Upload({})", u.name),
            BoundArg::Input(b) => write!(f, "Input({} bytes)", b.len()),
            BoundArg::Output => write!(f, "Output"),
            BoundArg::Context => write!(f, "Context"),
        }
    }
}

/// Ordered bound arguments for one method call.
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<BoundArg>);

impl Args {
    pub fn get(&self, index: usize) -> Option<&BoundArg> {
        self.0.get(index)
    }

    /// The argument's value; `Value::Null` for absent or non-data arguments.
    pub fn value(&self, index: usize) -> &Value {
        match self.0.get(index) {
            Some(BoundArg::Value(v)) => v,
            _ => &Value::Null,
        }
    }

    pub fn str(&self, index: usize) -> &str {
        self.value(index).as_str().unwrap_or_default()
    }

    pub fn i64(&self, index: usize) -> Option<i64> {
        self.value(index).as_i64()
    }

    pub fn bool(&self, index: usize) -> Option<bool> {
        self.value(index).as_bool()
    }

    /// Deserialize the argument's value into a concrete type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self, index: usize) -> Result<T, HttpError> {
        serde_json::from_value(self.value(index).clone())
            .map_err(|e| HttpError::new(HttpError::BAD_REQUEST, e.to_string()))
    }

    pub fn bean<T: Any + Send + Sync>(&self, index: usize) -> Option<Arc<T>> {
        match self.0.get(index) {
            Some(BoundArg::Bean(any)) => any.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn session(&self, index: usize) -> Option<&Session> {
        match self.0.get(index) {
            Some(BoundArg::Session(s)) => Some(s),
            _ => None,
        }
    }

    pub fn params(&self, index: usize) -> Option<&ParamMap> {
        match self.0.get(index) {
            Some(BoundArg::Params(p)) => Some(p),
            _ => None,
        }
    }

    pub fn upload(&self, index: usize) -> Option<&UploadedFile> {
        match self.0.get(index) {
            Some(BoundArg::Upload(u)) => Some(u),
            _ => None,
        }
    }

    pub fn input(&self, index: usize) -> Option<&[u8]> {
        match self.0.get(index) {
            Some(BoundArg::Input(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bind every parameter of one method call.
///
/// The body stream is consumed at most once: with exactly one BODY parameter
/// the whole decoded document binds to it; with several, the document must be
/// a map and each parameter reads its named field (an absent field binds
/// null). A body that fails to decode is a 400.
pub fn bind_all(
    ctx: &RequestContext,
    params: &[ParamMeta],
    beans: &BeanContext,
    codec: &dyn Codec,
) -> Result<Args, HttpError> {
    let mut out: Vec<Option<BoundArg>> = vec![None; params.len()];
    let mut body_slots: Vec<usize> = Vec::new();

    for (i, param) in params.iter().enumerate() {
        if param.source == ParamSource::Body {
            body_slots.push(i);
        } else {
            out[i] = Some(bind(ctx, param, beans)?);
        }
    }

    if !body_slots.is_empty() {
        let body = read_body(ctx, codec)?;
        if body_slots.len() == 1 {
            let i = body_slots[0];
            let value = finish(&params[i], body)?;
            out[i] = Some(value);
        } else {
            let map = body.as_object().cloned().unwrap_or_default();
            for i in body_slots {
                let field = map.get(&params[i].name).cloned().unwrap_or(Value::Null);
                out[i] = Some(finish(&params[i], field)?);
            }
        }
    }

    Ok(Args(
        out.into_iter()
            .map(|a| a.unwrap_or(BoundArg::Value(Value::Null)))
            .collect(),
    ))
}

/// Bind a single non-body parameter from the request context.
pub fn bind(
    ctx: &RequestContext,
    param: &ParamMeta,
    beans: &BeanContext,
) -> Result<BoundArg, HttpError> {
    if param.ignore {
        return Ok(BoundArg::Value(Value::Null));
    }

    let value = match param.source {
        // Reserved placeholder: never materializes a value.
        ParamSource::Path => Value::Null,
        ParamSource::Header => bind_header(ctx, param),
        ParamSource::Inject => {
            return finish_arg(param, bind_inject(param, beans));
        }
        ParamSource::Session => bind_session(ctx, param),
        ParamSource::Body => Value::Null, // handled by the batched body read
        ParamSource::Auto | ParamSource::Parameter => {
            if let Some(capability) = bind_capability(ctx, param) {
                return finish_arg(param, Some(capability));
            }
            bind_query(ctx, param)
        }
    };

    finish(param, value)
}

/// Refinement plus requiredness check for a data value.
fn finish(param: &ParamMeta, value: Value) -> Result<BoundArg, HttpError> {
    let value = refine(&param.ty, value);
    if param.required && is_missing(&param.ty, &value) {
        debug!(param = %param.name, "required parameter missing");
        return Err(HttpError::missing_parameter(&param.name));
    }
    Ok(BoundArg::Value(value))
}

/// Requiredness check for capability arguments; they carry no data value to
/// refine, so only an unresolved binding counts as missing.
fn finish_arg(param: &ParamMeta, arg: Option<BoundArg>) -> Result<BoundArg, HttpError> {
    match arg {
        Some(arg) => Ok(arg),
        None if param.required => Err(HttpError::missing_parameter(&param.name)),
        None => Ok(BoundArg::Value(Value::Null)),
    }
}

fn bind_header(ctx: &RequestContext, param: &ParamMeta) -> Value {
    match ctx.header(&param.name) {
        // Primitive-like scalars convert; anything else passes the raw string.
        Some(raw) if param.ty.is_scalar() => convert_scalar(&param.ty, raw),
        Some(raw) => Value::String(raw.to_string()),
        None => Value::Null,
    }
}

fn bind_inject(param: &ParamMeta, beans: &BeanContext) -> Option<BoundArg> {
    let ParamType::Bean(key) = &param.ty else {
        return None;
    };
    beans.get_any(key.type_id).map(BoundArg::Bean)
}

fn bind_session(ctx: &RequestContext, param: &ParamMeta) -> Value {
    let Some(session) = ctx.session() else {
        return Value::Null;
    };
    match session.get(&param.name) {
        // Fall back to a type-name lookup when the stored value's shape does
        // not match the declared type.
        Some(value) if !param.ty.accepts(&value) => {
            session.get(param.ty.lookup_name()).unwrap_or(Value::Null)
        }
        Some(value) => value,
        None => session.get(param.ty.lookup_name()).unwrap_or(Value::Null),
    }
}

/// Request-context capabilities bind directly, bypassing query/body parsing.
fn bind_capability(ctx: &RequestContext, param: &ParamMeta) -> Option<BoundArg> {
    match &param.ty {
        ParamType::Context => Some(BoundArg::Context),
        ParamType::Session => ctx.session().cloned().map(BoundArg::Session),
        ParamType::ParamMap => Some(BoundArg::Params(ctx.params().clone())),
        ParamType::Input => Some(BoundArg::Input(ctx.body().unwrap_or_default().to_vec())),
        ParamType::Output => Some(BoundArg::Output),
        ParamType::Upload => ctx.upload(&param.name).cloned().map(BoundArg::Upload),
        // Bean-typed parameters resolve only under an explicit Inject source.
        ParamType::Bean(_) => Some(BoundArg::Value(Value::Null)),
        _ => None,
    }
}

fn bind_query(ctx: &RequestContext, param: &ParamMeta) -> Value {
    let values: Vec<String> = match ctx.params().get_all(&param.name) {
        Some(values) => values.to_vec(),
        None => param.default_values.clone(),
    };
    convert(&param.ty, &values)
}

/// Convert raw string values to the declared type. Collection targets map
/// each raw value element-wise; scalar targets convert the first raw value;
/// unrecognized shapes are left null at this stage.
fn convert(ty: &ParamType, values: &[String]) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    match ty {
        ParamType::List(elem) => {
            Value::Array(values.iter().map(|v| convert_scalar(elem, v)).collect())
        }
        ParamType::Json => serde_json::from_str(&values[0])
            .unwrap_or_else(|_| Value::String(values[0].clone())),
        ParamType::Map => Value::Null,
        scalar => convert_scalar(scalar, &values[0]),
    }
}

fn convert_scalar(ty: &ParamType, raw: &str) -> Value {
    match ty {
        ParamType::Text => Value::String(raw.to_string()),
        ParamType::Integer | ParamType::Date => {
            raw.parse::<i64>().map(Value::from).unwrap_or(Value::Null)
        }
        ParamType::Number => raw.parse::<f64>().map(Value::from).unwrap_or(Value::Null),
        ParamType::Flag => match raw {
            "1" => Value::Bool(true),
            "0" => Value::Bool(false),
            other => other.parse::<bool>().map(Value::from).unwrap_or(Value::Null),
        },
        _ => Value::Null,
    }
}

/// Null-refinement: common container/string types never stay null.
pub fn refine(ty: &ParamType, value: Value) -> Value {
    if !value.is_null() {
        return value;
    }
    match ty {
        ParamType::Text => Value::String(String::new()),
        ParamType::List(_) => Value::Array(Vec::new()),
        ParamType::Map => Value::Object(serde_json::Map::new()),
        _ => Value::Null,
    }
}

/// A value is missing when it is null, an empty string, a zero-epoch date, or
/// an empty collection/map. Runs after refinement, so only non-container
/// types can be missing as a true null.
pub fn is_missing(ty: &ParamType, value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(n) => matches!(ty, ParamType::Date) && n.as_i64() == Some(0),
        _ => false,
    }
}

fn read_body(ctx: &RequestContext, codec: &dyn Codec) -> Result<Value, HttpError> {
    let Some(bytes) = ctx.body() else {
        return Ok(Value::Null);
    };
    let content_type = ctx
        .request_type()
        .map(str::to_string)
        .or_else(|| codec.mime_type(codec.default_format()).map(str::to_string))
        .unwrap_or_default();
    codec
        .read(bytes, &content_type)
        .map_err(|e| HttpError::new(HttpError::BAD_REQUEST, e.to_string()).with_cause(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use http::Method;
    use serde_json::json;

    fn ctx(path: &str) -> RequestContext {
        RequestContext::new(Method::GET, path)
    }

    #[test]
    fn query_scalar_converts_first_value() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m?n=3&n=4");
        let arg = bind(&ctx, &ParamMeta::integer("n"), &beans).unwrap();
        assert_eq!(*match &arg {
            BoundArg::Value(v) => v,
            _ => unreachable!(),
        }, json!(3));
    }

    #[test]
    fn list_target_maps_element_wise() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m?n=3&n=4");
        let param = ParamMeta::new("n", ParamType::List(Box::new(ParamType::Integer)));
        let args = bind_all(&ctx, &[param], &beans, &JsonCodec::new()).unwrap();
        assert_eq!(*args.value(0), json!([3, 4]));
    }

    #[test]
    fn absent_value_falls_back_to_defaults_then_refines() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m");
        let with_default = ParamMeta::text("who").default_value("world");
        let bare = ParamMeta::text("who");
        let args = bind_all(&ctx, &[with_default, bare], &beans, &JsonCodec::new()).unwrap();
        assert_eq!(*args.value(0), json!("world"));
        // refined to empty string, never null
        assert_eq!(*args.value(1), json!(""));
    }

    #[test]
    fn required_empty_string_is_missing() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m?name=");
        let err = bind(&ctx, &ParamMeta::text("name").required(), &beans).unwrap_err();
        assert_eq!(err.code, 400);
        assert!(err.message.contains("name"));
    }

    #[test]
    fn required_zero_epoch_date_is_missing() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m?at=0");
        let param = ParamMeta::new("at", ParamType::Date).required();
        let err = bind(&ctx, &param, &beans).unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn path_source_is_a_documented_no_op() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m?id=7");
        let param = ParamMeta::integer("id").source(ParamSource::Path);
        let arg = bind(&ctx, &param, &beans).unwrap();
        assert!(matches!(arg, BoundArg::Value(Value::Null)));
    }

    #[test]
    fn header_scalar_converts_other_shapes_pass_raw() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m").with_header("X-Count", "5").with_header("X-Tag", "[1,2]");
        let count = bind(&ctx, &ParamMeta::header("x-count", ParamType::Integer), &beans).unwrap();
        assert!(matches!(count, BoundArg::Value(ref v) if *v == json!(5)));
        let tag_param = ParamMeta::header("x-tag", ParamType::List(Box::new(ParamType::Integer)));
        let tag = bind(&ctx, &tag_param, &beans).unwrap();
        assert!(matches!(tag, BoundArg::Value(Value::String(_))));
    }

    #[test]
    fn single_body_param_takes_whole_document() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m").with_body(r#"{"name":"x","n":2}"#);
        let args = bind_all(&ctx, &[ParamMeta::body("doc")], &beans, &JsonCodec::new()).unwrap();
        assert_eq!(*args.value(0), json!({"name": "x", "n": 2}));
    }

    #[test]
    fn multiple_body_params_read_named_fields() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m").with_body(r#"{"name":"x","n":2}"#);
        let params = [ParamMeta::body("name"), ParamMeta::body("n"), ParamMeta::body("nope")];
        let args = bind_all(&ctx, &params, &beans, &JsonCodec::new()).unwrap();
        assert_eq!(*args.value(0), json!("x"));
        assert_eq!(*args.value(1), json!(2));
        assert_eq!(*args.value(2), Value::Null);
    }

    #[test]
    fn undecodable_body_is_a_bad_request() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m").with_body("{nope");
        let err = bind_all(&ctx, &[ParamMeta::body("doc")], &beans, &JsonCodec::new()).unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn capability_binds_param_map_directly() {
        let beans = BeanContext::new();
        let ctx = ctx("/c/m?a=1");
        let param = ParamMeta::new("params", ParamType::ParamMap);
        let args = bind_all(&ctx, &[param], &beans, &JsonCodec::new()).unwrap();
        assert_eq!(args.params(0).unwrap().get("a"), Some("1"));
    }

    #[test]
    fn inject_resolves_bean_from_container() {
        struct Clock;
        impl crate::bean::Bean for Clock {}

        let beans = BeanContext::new();
        beans.add(std::sync::Arc::new(Clock));
        let ctx = ctx("/c/m");
        let args = bind_all(&ctx, &[ParamMeta::inject::<Clock>("clock")], &beans, &JsonCodec::new())
            .unwrap();
        assert!(args.bean::<Clock>(0).is_some());
    }

    #[test]
    fn unresolved_required_inject_is_missing() {
        struct Clock;

        let beans = BeanContext::new();
        let ctx = ctx("/c/m");
        let param = ParamMeta::inject::<Clock>("clock").required();
        let err = bind_all(&ctx, &[param], &beans, &JsonCodec::new()).unwrap_err();
        assert_eq!(err.code, 400);
    }
}
