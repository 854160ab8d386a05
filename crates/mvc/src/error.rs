//! Error types raised while dispatching a request.
//!
//! [`DispatchError`] is the typed taxonomy the dispatcher knows how to translate into
//! a response: every variant maps to exactly one HTTP status. Handlers are free to return
//! any error through [`HandlerError`]; the exception resolver downcasts it back to a
//! [`DispatchError`] when it can and falls back to `500 Internal Server Error` otherwise.

use http::{Method, StatusCode};
use std::error::Error;
use thiserror::Error;

/// The error type returned by handlers, interceptors and resolvers.
pub type HandlerError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route matches path '{path}'")]
    NotFound { path: String },

    #[error("request method '{method}' is not supported")]
    MethodNotSupported { method: Method, allowed: Vec<Method> },

    #[error("parameter conditions \"{rule}\" not met for actual request parameters")]
    ParamValidate { rule: String },

    #[error("header conditions \"{rule}\" not met for actual request headers")]
    HeaderValidate { rule: String },

    #[error("content type '{content_type}' is not supported")]
    ContentNotSupported { content_type: String },

    #[error("could not find acceptable representation for '{produces}'")]
    ContentNotAcceptable { produces: String },

    #[error("required request body is missing")]
    BodyMissing,

    #[error("failed to parse multipart request: {reason}")]
    Multipart { reason: String },

    #[error("maximum upload size of {limit} bytes exceeded")]
    MaxUploadSizeExceeded { limit: u64 },

    #[error("{message}")]
    Status { status: StatusCode, message: String },

    #[error("internal server error: {reason}")]
    ServerInternal { reason: String },
}

impl DispatchError {
    pub fn not_found<S: ToString>(path: S) -> Self {
        Self::NotFound { path: path.to_string() }
    }

    pub fn method_not_supported(method: Method, allowed: Vec<Method>) -> Self {
        Self::MethodNotSupported { method, allowed }
    }

    pub fn param_validate<S: ToString>(rule: S) -> Self {
        Self::ParamValidate { rule: rule.to_string() }
    }

    pub fn header_validate<S: ToString>(rule: S) -> Self {
        Self::HeaderValidate { rule: rule.to_string() }
    }

    pub fn content_not_supported<S: ToString>(content_type: S) -> Self {
        Self::ContentNotSupported { content_type: content_type.to_string() }
    }

    pub fn content_not_acceptable<S: ToString>(produces: S) -> Self {
        Self::ContentNotAcceptable { produces: produces.to_string() }
    }

    pub fn multipart<S: ToString>(reason: S) -> Self {
        Self::Multipart { reason: reason.to_string() }
    }

    pub fn max_upload_size_exceeded(limit: u64) -> Self {
        Self::MaxUploadSizeExceeded { limit }
    }

    /// An application-declared HTTP error, e.g. a `401` raised by an authentication interceptor.
    pub fn status<S: ToString>(status: StatusCode, message: S) -> Self {
        Self::Status { status, message: message.to_string() }
    }

    pub fn server_internal<S: ToString>(reason: S) -> Self {
        Self::ServerInternal { reason: reason.to_string() }
    }

    /// The HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotSupported { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::ParamValidate { .. } | Self::HeaderValidate { .. } | Self::BodyMissing | Self::Multipart { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::ContentNotSupported { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::ContentNotAcceptable { .. } => StatusCode::NOT_ACCEPTABLE,
            Self::MaxUploadSizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Status { status, .. } => *status,
            Self::ServerInternal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Raised at registration time when a textual rule can not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("empty rule")]
    Empty,

    #[error("invalid predicate rule '{rule}': {reason}")]
    InvalidPredicate { rule: String, reason: &'static str },

    #[error("invalid media type rule '{rule}'")]
    InvalidMediaType { rule: String },

    #[error("invalid method '{method}'")]
    InvalidMethod { method: String },

    #[error("invalid path template '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

/// Failures of a session store.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session id '{id}'")]
    InvalidId { id: String },

    #[error("session io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("malformed session data: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}
