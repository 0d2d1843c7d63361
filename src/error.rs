//! Error taxonomy for the dispatch engine and the bean container.
//!
//! Request failures are funneled into [`HttpError`] carrying an HTTP status
//! code; bean proxy failures stay as [`BeanCallError`] since they may occur
//! outside any request (for example at startup wiring) and must not be
//! reinterpreted as HTTP errors by the proxy layer itself.

use std::fmt;

/// Boxed error type used for invocation failures flowing through bean proxies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An HTTP-mapped failure: status code, message and optional cause.
///
/// Thrown by route resolution (404), parameter binding (400) and handler
/// invocation (whatever the handler carries, else 500).
#[derive(Debug, thiserror::Error)]
pub struct HttpError {
    /// HTTP status code to respond with.
    pub code: u16,
    /// Human readable message, serialized into the error body.
    pub message: String,
    /// Underlying cause, if any.
    #[source]
    pub cause: Option<BoxError>,
}

impl HttpError {
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL_ERROR: u16 = 500;

    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap an arbitrary failure as a 500.
    pub fn internal(cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self {
            code: Self::INTERNAL_ERROR,
            message: cause.to_string(),
            cause: Some(cause),
        }
    }

    pub fn not_found() -> Self {
        Self::new(Self::NOT_FOUND, "Not found")
    }

    /// A required parameter was judged missing after null-refinement.
    pub fn missing_parameter(name: &str) -> Self {
        Self::new(
            Self::BAD_REQUEST,
            format!("Bad request - missing required parameter: {name}"),
        )
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// A thread-scoped bean was used before the calling thread bound an instance.
#[derive(Debug, thiserror::Error)]
#[error("thread scoped bean `{type_name}` was used before an instance was bound on this thread")]
pub struct UnboundScopeError {
    /// Type name of the scoped bean.
    pub type_name: &'static str,
}

/// Failure of a call made through a [`BeanProxy`](crate::bean::BeanProxy).
///
/// Not converted to an [`HttpError`] by the proxy layer; the dispatcher maps
/// `Unbound` to a 500 when it surfaces inside a request.
#[derive(Debug, thiserror::Error)]
pub enum BeanCallError {
    #[error(transparent)]
    Unbound(#[from] UnboundScopeError),
    /// The invoked method itself failed; propagated after all after-hooks ran.
    #[error(transparent)]
    Invocation(BoxError),
}

impl From<BeanCallError> for HttpError {
    fn from(err: BeanCallError) -> Self {
        HttpError::internal(err)
    }
}

/// Encoder/decoder collaborator failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown format alias `{0}`")]
    UnknownFormat(String),
    #[error("failed to decode request body: {0}")]
    Decode(#[source] BoxError),
    #[error("failed to encode response value: {0}")]
    Encode(#[source] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameter_names_the_parameter() {
        let err = HttpError::missing_parameter("name");
        assert_eq!(err.code, HttpError::BAD_REQUEST);
        assert!(err.message.contains("name"));
    }

    #[test]
    fn internal_preserves_cause() {
        let err = HttpError::internal(std::io::Error::other("boom"));
        assert_eq!(err.code, 500);
        assert!(err.cause.is_some());
    }
}
