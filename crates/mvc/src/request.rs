//! Request handling module that provides access to HTTP request information.
//!
//! This module contains the request-side object model the dispatcher works on:
//! - `Request`: method, URI, headers, parameters, attributes, path variables, body,
//!   resolved multipart content and the session slot
//! - `PathVariables`: variables bound by templated path segments

use crate::body::RequestBody;
use crate::error::{DispatchError, HandlerError};
use crate::multipart::MultipartRequest;
use crate::params::ParamMap;
use crate::session::{Session, SessionSlot};
use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri, Version};
use http_body::Body as HttpBody;
use mime::Mime;
use std::sync::Arc;

/// Request attribute holding the media type resolved from the selected route's `produces` rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProduces(pub Mime);

/// An already decoded HTTP request, as seen by routing, interceptors and handlers.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    attributes: Extensions,
    params: ParamMap,
    path_variables: PathVariables,
    body: RequestBody,
    multipart: Option<Arc<MultipartRequest>>,
    session: SessionSlot,
    forward_depth: usize,
}

impl Request {
    /// Creates a request from its head and body; the query string is parsed into parameters.
    pub fn new(parts: http::request::Parts, body: RequestBody) -> Self {
        let params = parts.uri.query().map(ParamMap::parse_query).unwrap_or_default();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            attributes: parts.extensions,
            params,
            path_variables: PathVariables::empty(),
            body,
            multipart: None,
            session: SessionSlot::disabled(),
            forward_depth: 0,
        }
    }

    pub fn from_http<B>(request: http::Request<B>) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<HandlerError>,
    {
        let (parts, body) = request.into_parts();
        Self::new(parts, RequestBody::new(body))
    }

    /// Returns the HTTP method of the request
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the URI of the request
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the HTTP version of the request
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the HTTP headers of the request
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the first value of the header as a string, if present and visible ASCII.
    pub fn header_str(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The request-scoped attribute bag.
    pub fn attributes(&self) -> &Extensions {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Extensions {
        &mut self.attributes
    }

    /// Query parameters, plus text fields of a resolved multipart body.
    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamMap {
        &mut self.params
    }

    /// Returns a reference to the path variables bound by the matched route
    pub fn path_variables(&self) -> &PathVariables {
        &self.path_variables
    }

    pub(crate) fn set_path_variables(&mut self, path_variables: PathVariables) {
        self.path_variables = path_variables;
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// The multipart content, present once the multipart resolver ran.
    pub fn multipart(&self) -> Option<&Arc<MultipartRequest>> {
        self.multipart.as_ref()
    }

    pub(crate) fn set_multipart(&mut self, multipart: Arc<MultipartRequest>) {
        self.params.extend(multipart.fields().iter());
        self.multipart = Some(multipart);
    }

    /// The media type the selected route produces, if it declares one.
    pub fn resolved_produces(&self) -> Option<&Mime> {
        self.attributes.get::<ResolvedProduces>().map(|produces| &produces.0)
    }

    /// Returns the session of this request, creating one if none exists yet.
    pub async fn session(&self) -> Result<Session, DispatchError> {
        self.session.get_or_create().await
    }

    /// Returns the session of this request only if the client presented a live one
    /// or one was created earlier in this request.
    pub async fn existing_session(&self) -> Result<Option<Session>, DispatchError> {
        self.session.get().await
    }

    pub(crate) fn session_slot(&self) -> &SessionSlot {
        &self.session
    }

    pub(crate) fn set_session_slot(&mut self, session: SessionSlot) {
        self.session = session;
    }

    pub(crate) fn forward_depth(&self) -> usize {
        self.forward_depth
    }

    /// Creates the request an internal forward to `path` dispatches.
    ///
    /// The query string, headers, attributes, parameters, body handle, multipart content and
    /// session are carried over, path variables are reset. A query on `path` is put in front
    /// of the original one.
    pub(crate) fn forwarded(&self, path: &str) -> Result<Request, DispatchError> {
        let target_query = path.split_once('?').map(|(_, query)| query);
        let path_and_query = match (target_query, self.uri.query()) {
            (Some(_), Some(query)) => format!("{path}&{query}"),
            (None, Some(query)) => format!("{path}?{query}"),
            (_, None) => path.to_string(),
        };
        let params = match target_query {
            Some(query) => {
                let mut params = ParamMap::parse_query(query);
                params.extend(self.params.iter());
                params
            }
            None => self.params.clone(),
        };
        let uri = Uri::builder()
            .path_and_query(path_and_query.as_str())
            .build()
            .map_err(|e| DispatchError::server_internal(format!("invalid forward path '{path}': {e}")))?;

        Ok(Request {
            method: self.method.clone(),
            uri,
            version: self.version,
            headers: self.headers.clone(),
            attributes: self.attributes.clone(),
            params,
            path_variables: PathVariables::empty(),
            body: self.body.clone(),
            multipart: self.multipart.clone(),
            session: self.session.clone(),
            forward_depth: self.forward_depth + 1,
        })
    }
}

/// Represents path variables extracted from the URL path of an HTTP request.
///
/// For example, with the rule `/users/{id}` and the path `/users/42`, `id` is bound to `42`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathVariables {
    variables: Vec<(String, String)>,
}

impl PathVariables {
    /// Creates an empty PathVariables instance with no variables
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Gets the value of a path variable by its name
    /// Returns None if the variable doesn't exist
    #[inline]
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();
        self.variables.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl From<Vec<(String, String)>> for PathVariables {
    fn from(variables: Vec<(String, String)>) -> Self {
        Self { variables }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        let (parts, ()) = http::Request::builder().method(Method::POST).uri(uri).body(()).unwrap().into_parts();
        Request::new(parts, RequestBody::empty())
    }

    #[test]
    fn query_is_parsed_into_params() {
        let request = request("/search?q=rust&page=2&q=http");
        assert_eq!(request.path(), "/search");
        assert_eq!(request.params().get_all("q").collect::<Vec<_>>(), vec!["rust", "http"]);
        assert_eq!(request.params().get("page"), Some("2"));
    }

    #[test]
    fn forwarded_request_keeps_query_and_attributes() {
        let mut original = request("/a?x=1");
        original.attributes_mut().insert(ResolvedProduces(mime::APPLICATION_JSON));
        original.set_path_variables(vec![("id".to_string(), "1".to_string())].into());

        let forwarded = original.forwarded("/b.html").unwrap();
        assert_eq!(forwarded.uri().to_string(), "/b.html?x=1");
        assert_eq!(forwarded.method(), Method::POST);
        assert_eq!(forwarded.resolved_produces(), Some(&mime::APPLICATION_JSON));
        assert!(forwarded.path_variables().is_empty());
        assert_eq!(forwarded.forward_depth(), 1);
    }

    #[test]
    fn forward_target_query_joins_the_original() {
        let original = request("/a?x=1");

        let forwarded = original.forwarded("/b?y=2").unwrap();
        assert_eq!(forwarded.uri().to_string(), "/b?y=2&x=1");
        assert_eq!(forwarded.path(), "/b");
        assert_eq!(forwarded.params().get("y"), Some("2"));
        assert_eq!(forwarded.params().get("x"), Some("1"));

        let forwarded = request("/a").forwarded("/b?y=2").unwrap();
        assert_eq!(forwarded.uri().to_string(), "/b?y=2");
        assert_eq!(forwarded.params().get("y"), Some("2"));
    }

    #[test]
    fn path_variables_lookup() {
        let variables = PathVariables::from(vec![("id".to_string(), "42".to_string())]);
        assert_eq!(variables.get("id"), Some("42"));
        assert_eq!(variables.get("other"), None);
        assert_eq!(variables.len(), 1);
    }
}
