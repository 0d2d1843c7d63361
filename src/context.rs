//! Per-request context and session collaborator.
//!
//! The embedding transport constructs one [`RequestContext`] per inbound
//! request, hands it to [`Dispatcher::handle`](crate::dispatcher::Dispatcher)
//! and writes the context's response buffer back to the wire. The context is
//! mutated only by the dispatcher and handlers during that request's lifetime
//! and discarded at response flush.

use dashmap::DashMap;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Multi-valued query/form parameter set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    inner: HashMap<String, Vec<String>>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value registered under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.inner.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.entry(name.into()).or_default().push(value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.inner.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Parse query string parameters from a URL path.
///
/// Extracts everything after the `?` character and URL-decodes names and
/// values; repeated names accumulate in order.
pub fn parse_query_params(path: &str) -> ParamMap {
    let mut map = ParamMap::new();
    if let Some(pos) = path.find('?') {
        let query_str = &path[pos + 1..];
        for (k, v) in url::form_urlencoded::parse(query_str.as_bytes()) {
            map.insert(k.to_string(), v.to_string());
        }
    }
    map
}

/// An uploaded file attached to the request by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub name: String,
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    /// Upload contents as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Session handle shared between the dispatcher, handlers and SESSION-kind
/// parameters. Values are structured [`Value`]s keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Session {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.read().ok()?.get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        if let Ok(mut values) = self.values.write() {
            values.insert(name.into(), value);
        }
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.values.write().ok()?.remove(name)
    }
}

/// Session collaborator: resolves the session handle for a request.
///
/// Cookie issuance and persistence live outside this crate; implementations
/// only need to answer "which session does this request belong to".
pub trait SessionStore: Send + Sync {
    fn session(&self, ctx: &RequestContext) -> Session;
}

/// In-memory session store keyed on the `x-session-id` header, with one
/// shared anonymous session for requests that carry none.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
    anonymous: Session,
}

impl MemorySessionStore {
    pub const SESSION_HEADER: &'static str = "x-session-id";

    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn session(&self, ctx: &RequestContext) -> Session {
        match ctx.header(Self::SESSION_HEADER) {
            Some(id) => self
                .sessions
                .entry(id.to_string())
                .or_default()
                .clone(),
            None => self.anonymous.clone(),
        }
    }
}

/// Per-request aggregate: path, verb, headers, query parameters, body, session
/// handle, response-type negotiation state and response buffer.
#[derive(Debug)]
pub struct RequestContext {
    method: Method,
    path: String,
    headers: HashMap<String, String>,
    params: ParamMap,
    body: Option<Vec<u8>>,
    uploads: HashMap<String, UploadedFile>,
    session: Option<Session>,
    response_type: Option<String>,
    status: u16,
    response_headers: Vec<(String, String)>,
    out: Vec<u8>,
    committed: bool,
    handled: bool,
}

impl RequestContext {
    /// Build a context from a method and a path that may carry a query string.
    pub fn new(method: Method, path: &str) -> Self {
        let params = parse_query_params(path);
        let path = path.split('?').next().unwrap_or("/").to_string();
        Self {
            method,
            path,
            headers: HashMap::new(),
            params,
            body: None,
            uploads: HashMap::new(),
            session: None,
            response_type: None,
            status: 200,
            response_headers: Vec::new(),
            out: Vec::new(),
            committed: false,
            handled: false,
        }
    }

    /// Header names are stored lower-cased, as the transport parses them.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name, value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_upload(mut self, upload: UploadedFile) -> Self {
        self.uploads.insert(upload.name.clone(), upload);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Request content type, when the transport supplied one.
    pub fn request_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn upload(&self, name: &str) -> Option<&UploadedFile> {
        self.uploads.get(name)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub(crate) fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// Negotiated response MIME type.
    pub fn response_type(&self) -> Option<&str> {
        self.response_type.as_deref()
    }

    pub fn set_response_type(&mut self, mime: impl Into<String>) {
        self.response_type = Some(mime.into());
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Set (replacing) a response header.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        for (n, v) in &mut self.response_headers {
            if n.eq_ignore_ascii_case(name) {
                *v = value;
                return;
            }
        }
        self.response_headers.push((name.to_string(), value));
    }

    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn response_headers(&self) -> &[(String, String)] {
        &self.response_headers
    }

    /// Append bytes to the response buffer.
    pub fn write(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn output(&self) -> &[u8] {
        &self.out
    }

    /// Mark the response as flushed. Further writes are protocol errors and
    /// are suppressed by all failure paths.
    pub fn flush(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// A handler (or filter) claimed the response entirely; the dispatcher
    /// skips serialization.
    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }
}
