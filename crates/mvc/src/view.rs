//! Turning handler results into responses.
//!
//! A handler returns a [`View`]: either a REST view whose output is written as the response
//! body, or an action view whose output is a symbolic string:
//! - `redirect:<path>` answers `302 Found` with `Location: <path>`
//! - `forward:<path>` dispatches `<path>` internally within the same exchange
//! - any other path forwards to `<path>.html`
//!
//! [`ViewResolver::resolve`] never mutates the view, resolving the same view twice against the
//! same request yields the same response.

use crate::body::ResponseBody;
use crate::error::{DispatchError, HandlerError};
use crate::extract::Json;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use mime::Mime;
use serde::Serialize;
use std::sync::Arc;

/// The value a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutput {
    Empty,
    /// A ready response body, written verbatim.
    Body(Bytes),
    Text(String),
    /// A structured value, written by the message converter.
    Object(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    rest: bool,
    status: StatusCode,
    headers: HeaderMap,
    output: ViewOutput,
}

impl View {
    pub fn rest(output: ViewOutput) -> Self {
        Self { rest: true, status: StatusCode::OK, headers: HeaderMap::new(), output }
    }

    /// An action view: `redirect:<path>`, `forward:<path>` or a bare logical path.
    pub fn action(action: impl Into<String>) -> Self {
        Self { rest: false, status: StatusCode::OK, headers: HeaderMap::new(), output: ViewOutput::Text(action.into()) }
    }

    pub fn empty() -> Self {
        Self::rest(ViewOutput::Empty)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::rest(ViewOutput::Text(text.into()))
    }

    pub fn body(bytes: impl Into<Bytes>) -> Self {
        Self::rest(ViewOutput::Body(bytes.into()))
    }

    pub fn object(value: serde_json::Value) -> Self {
        Self::rest(ViewOutput::Object(value))
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn is_rest(&self) -> bool {
        self.rest
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn output(&self) -> &ViewOutput {
        &self.output
    }
}

/// Conversion of handler return values into a [`View`].
pub trait IntoView {
    fn into_view(self) -> Result<View, HandlerError>;
}

impl IntoView for View {
    fn into_view(self) -> Result<View, HandlerError> {
        Ok(self)
    }
}

impl IntoView for () {
    fn into_view(self) -> Result<View, HandlerError> {
        Ok(View::empty())
    }
}

impl IntoView for String {
    fn into_view(self) -> Result<View, HandlerError> {
        Ok(View::text(self))
    }
}

impl IntoView for &'static str {
    fn into_view(self) -> Result<View, HandlerError> {
        Ok(View::text(self))
    }
}

impl IntoView for Bytes {
    fn into_view(self) -> Result<View, HandlerError> {
        Ok(View::body(self))
    }
}

impl IntoView for serde_json::Value {
    fn into_view(self) -> Result<View, HandlerError> {
        Ok(View::object(self))
    }
}

impl<T: Serialize> IntoView for Json<T> {
    fn into_view(self) -> Result<View, HandlerError> {
        Ok(View::object(serde_json::to_value(self.0)?))
    }
}

impl<T: IntoView> IntoView for (StatusCode, T) {
    fn into_view(self) -> Result<View, HandlerError> {
        let (status, view) = self;
        Ok(view.into_view()?.with_status(status))
    }
}

impl<T, E> IntoView for Result<T, E>
where
    T: IntoView,
    E: Into<HandlerError>,
{
    fn into_view(self) -> Result<View, HandlerError> {
        self.map_err(Into::<HandlerError>::into)?.into_view()
    }
}

/// Writes structured handler output into a response body.
#[cfg_attr(test, mockall::automock)]
pub trait MessageConverter: Send + Sync {
    /// Returns the body bytes and the media type they are encoded as; `produces` is the
    /// selected route's resolved media type, if any.
    fn write<'a>(&self, value: &serde_json::Value, produces: Option<&'a Mime>) -> Result<(Bytes, Mime), HandlerError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMessageConverter;

impl MessageConverter for JsonMessageConverter {
    fn write(&self, value: &serde_json::Value, produces: Option<&Mime>) -> Result<(Bytes, Mime), HandlerError> {
        let bytes = serde_json::to_vec(value)?;
        let media_type = match produces {
            Some(produces) if produces.subtype() == mime::JSON || produces.suffix() == Some(mime::JSON) => {
                produces.clone()
            }
            _ => mime::APPLICATION_JSON,
        };
        Ok((Bytes::from(bytes), media_type))
    }
}

/// Outcome of resolving a view.
#[derive(Debug)]
pub enum Resolution {
    Response(Response<ResponseBody>),
    /// The request must be dispatched again for this path.
    Forward(String),
}

const REDIRECT_PREFIX: &str = "redirect:";
const FORWARD_PREFIX: &str = "forward:";
const VIEW_SUFFIX: &str = ".html";

#[derive(Clone, Default)]
pub struct ViewResolver {
    converter: Option<Arc<dyn MessageConverter>>,
}

impl ViewResolver {
    pub fn new(converter: Option<Arc<dyn MessageConverter>>) -> Self {
        Self { converter }
    }

    /// Resolves `view`; `produces` is the media type the selected route declared.
    pub fn resolve(&self, view: &View, produces: Option<&Mime>) -> Result<Resolution, HandlerError> {
        if view.rest {
            return self.resolve_rest(view, produces).map(Resolution::Response);
        }

        let action = match &view.output {
            ViewOutput::Text(action) if !action.trim().is_empty() => action.trim(),
            other => return Err(DispatchError::server_internal(format!("unresolvable view output {other:?}")).into()),
        };

        if let Some(location) = action.strip_prefix(REDIRECT_PREFIX) {
            let location = HeaderValue::try_from(location.trim())
                .map_err(|_| DispatchError::server_internal(format!("invalid redirect location '{location}'")))?;
            let mut response = self.base_response(view, ResponseBody::empty());
            *response.status_mut() = StatusCode::FOUND;
            response.headers_mut().insert(LOCATION, location);
            return Ok(Resolution::Response(response));
        }

        if let Some(path) = action.strip_prefix(FORWARD_PREFIX) {
            return Ok(Resolution::Forward(absolute(path.trim())));
        }

        Ok(Resolution::Forward(absolute(&format!("{action}{VIEW_SUFFIX}"))))
    }

    fn resolve_rest(&self, view: &View, produces: Option<&Mime>) -> Result<Response<ResponseBody>, HandlerError> {
        let (body, content_type) = match &view.output {
            ViewOutput::Empty => (Bytes::new(), None),
            ViewOutput::Body(bytes) => {
                (bytes.clone(), Some(produces.cloned().unwrap_or(mime::APPLICATION_OCTET_STREAM)))
            }
            ViewOutput::Text(text) => (Bytes::from(text.clone()), Some(produces.cloned().unwrap_or(mime::TEXT_PLAIN_UTF_8))),
            ViewOutput::Object(value) => match &self.converter {
                Some(converter) => {
                    let (bytes, media_type) = converter.write(value, produces)?;
                    (bytes, Some(media_type))
                }
                None => {
                    let text = match value {
                        serde_json::Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    (Bytes::from(text), Some(produces.cloned().unwrap_or(mime::TEXT_PLAIN_UTF_8)))
                }
            },
        };

        let mut response = self.base_response(view, ResponseBody::once(body));
        if let Some(content_type) = content_type
            && !response.headers().contains_key(CONTENT_TYPE)
        {
            let value = HeaderValue::try_from(content_type.as_ref())
                .map_err(|_| DispatchError::server_internal(format!("invalid content type '{content_type}'")))?;
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        Ok(response)
    }

    fn base_response(&self, view: &View, body: ResponseBody) -> Response<ResponseBody> {
        let mut response = Response::new(body);
        *response.status_mut() = view.status;
        *response.headers_mut() = view.headers.clone();
        response
    }
}

fn absolute(path: &str) -> String {
    if path.starts_with('/') { path.to_string() } else { format!("/{path}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(resolution: Resolution) -> Response<ResponseBody> {
        match resolution {
            Resolution::Response(response) => response,
            Resolution::Forward(path) => panic!("unexpected forward to {path}"),
        }
    }

    fn forward(resolution: Resolution) -> String {
        match resolution {
            Resolution::Forward(path) => path,
            Resolution::Response(response) => panic!("unexpected response {response:?}"),
        }
    }

    #[test]
    fn rest_text_uses_resolved_produces() {
        let resolver = ViewResolver::default();
        let resp = response(resolver.resolve(&View::text("hi"), Some(&mime::TEXT_HTML)).unwrap());
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/html");
        assert_eq!(resp.body().as_bytes(), Some(&b"hi"[..]));

        let resp = response(resolver.resolve(&View::text("hi"), None).unwrap());
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[test]
    fn rest_object_goes_through_converter() {
        let mut converter = MockMessageConverter::new();
        converter
            .expect_write()
            .times(1)
            .returning(|value, _| Ok((Bytes::from(value.to_string()), mime::APPLICATION_JSON)));
        let resolver = ViewResolver::new(Some(Arc::new(converter)));

        let resp = response(resolver.resolve(&View::object(json!({"a": 1})), None).unwrap());
        assert_eq!(resp.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(resp.body().as_bytes(), Some(&br#"{"a":1}"#[..]));
    }

    #[test]
    fn converter_receives_resolved_produces() {
        let produces: Mime = "application/vnd.api+json".parse().unwrap();
        let mut converter = MockMessageConverter::new();
        converter
            .expect_write()
            .withf(|_, produces| produces.map(Mime::essence_str) == Some("application/vnd.api+json"))
            .times(1)
            .returning(|value, produces| Ok((Bytes::from(value.to_string()), produces.cloned().unwrap())));
        let resolver = ViewResolver::new(Some(Arc::new(converter)));

        let resp = response(resolver.resolve(&View::object(json!({"b": 2})), Some(&produces)).unwrap());
        assert_eq!(resp.headers()[CONTENT_TYPE], "application/vnd.api+json");
    }

    #[test]
    fn rest_object_without_converter_is_stringified() {
        let resolver = ViewResolver::default();
        let resp = response(resolver.resolve(&View::object(json!([1, 2])), None).unwrap());
        assert_eq!(resp.body().as_bytes(), Some(&b"[1,2]"[..]));
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[test]
    fn json_converter_keeps_json_produces() {
        let produces: Mime = "application/vnd.api+json".parse().unwrap();
        let (bytes, media_type) = JsonMessageConverter.write(&json!({"a": true}), Some(&produces)).unwrap();
        assert_eq!(bytes, Bytes::from_static(br#"{"a":true}"#));
        assert_eq!(media_type, produces);

        let (_, media_type) = JsonMessageConverter.write(&json!(null), Some(&mime::TEXT_PLAIN)).unwrap();
        assert_eq!(media_type, mime::APPLICATION_JSON);
    }

    #[test]
    fn redirect_action() {
        let resp = response(ViewResolver::default().resolve(&View::action("redirect:/login"), None).unwrap());
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[LOCATION], "/login");
    }

    #[test]
    fn forward_and_bare_path_actions() {
        let resolver = ViewResolver::default();
        assert_eq!(forward(resolver.resolve(&View::action("forward:/other"), None).unwrap()), "/other");
        assert_eq!(forward(resolver.resolve(&View::action("users/list"), None).unwrap()), "/users/list.html");
        assert_eq!(forward(resolver.resolve(&View::action("/index"), None).unwrap()), "/index.html");
    }

    #[test]
    fn malformed_action_is_internal_error() {
        let resolver = ViewResolver::default();
        let error = resolver.resolve(&View::action("  "), None).unwrap_err();
        let error = error.downcast_ref::<DispatchError>().unwrap();
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let mut view = View::body(Bytes::from_static(b"x"));
        view.rest = false;
        assert!(resolver.resolve(&view, None).is_err());
    }

    #[test]
    fn resolving_twice_is_idempotent() {
        let resolver = ViewResolver::new(Some(Arc::new(JsonMessageConverter)));
        let view = View::object(json!({"name": "zava"})).with_status(StatusCode::CREATED);

        let first = response(resolver.resolve(&view, None).unwrap());
        let second = response(resolver.resolve(&view, None).unwrap());
        assert_eq!(first.status(), second.status());
        assert_eq!(first.headers(), second.headers());
        assert_eq!(first.body().as_bytes(), second.body().as_bytes());
    }

    #[test]
    fn into_view_conversions() {
        assert_eq!(().into_view().unwrap().output(), &ViewOutput::Empty);
        assert_eq!("a".into_view().unwrap().output(), &ViewOutput::Text("a".into()));
        let view = (StatusCode::ACCEPTED, Json(vec![1])).into_view().unwrap();
        assert_eq!(view.status(), StatusCode::ACCEPTED);
        assert_eq!(view.output(), &ViewOutput::Object(json!([1])));

        let failed: Result<String, std::io::Error> = Err(std::io::Error::other("boom"));
        assert!(failed.into_view().is_err());
    }
}
