//! Translating dispatch failures into responses.

use crate::body::ResponseBody;
use crate::cors::join_header;
use crate::error::{DispatchError, HandlerError};
use crate::request::Request;
use http::header::{ALLOW, CONTENT_TYPE};
use http::{HeaderValue, Response, StatusCode};
use tracing::{debug, error};

/// Turns an error raised anywhere in the pipeline into a response.
///
/// A resolver that fails itself makes the dispatcher answer with a plain `500`.
pub trait ExceptionResolver: Send + Sync {
    fn resolve(&self, req: &Request, error: &HandlerError) -> Result<Response<ResponseBody>, HandlerError>;
}

/// Typed [`DispatchError`]s answer with their status and message, everything else is a `500`
/// carrying the error's message.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExceptionResolver;

impl ExceptionResolver for DefaultExceptionResolver {
    fn resolve(&self, req: &Request, error: &HandlerError) -> Result<Response<ResponseBody>, HandlerError> {
        let Some(dispatch_error) = error.downcast_ref::<DispatchError>() else {
            error!(method = %req.method(), path = %req.path(), cause = %error, "unhandled error while dispatching");
            return Ok(text_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()));
        };

        let status = dispatch_error.status_code();
        if status.is_server_error() {
            error!(method = %req.method(), path = %req.path(), cause = %dispatch_error, "dispatch failed");
        } else {
            debug!(method = %req.method(), path = %req.path(), status = %status, cause = %dispatch_error, "dispatch rejected");
        }

        let mut response = text_response(status, dispatch_error.to_string());
        if let DispatchError::MethodNotSupported { allowed, .. } = dispatch_error {
            let allow = join_header(allowed.iter().map(http::Method::as_str)).unwrap_or(HeaderValue::from_static(""));
            response.headers_mut().insert(ALLOW, allow);
        }
        Ok(response)
    }
}

fn text_response(status: StatusCode, message: String) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::from(message));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// The last-resort answer when the exception resolver itself fails.
pub(crate) fn internal_server_error() -> Response<ResponseBody> {
    text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
}
