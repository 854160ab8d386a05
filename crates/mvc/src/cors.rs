//! Cross-origin resource sharing.
//!
//! A [`CrossOrigin`] policy is attached to a route or a scope at registration. Routes without a
//! policy are not subject to CORS checks. Preflight requests are answered by [`OptionsHandler`],
//! actual cross-origin requests are checked by [`crate::interceptor::CorsInterceptor`].

use crate::body::ResponseBody;
use crate::mapping::Mapping;
use crate::registry::Route;
use crate::request::Request;
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, ALLOW, CONTENT_TYPE, ORIGIN, VARY,
};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use tracing::debug;

const ALL: &str = "*";
const DEFAULT_MAX_AGE: u64 = 1800;

/// Every method a preflight rejection advertises in `Allow`.
pub const ALL_METHODS: [Method; 8] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
    Method::TRACE,
];

/// A CORS policy.
///
/// Defaults: every origin, the methods of the mapping, every request header, no credentials,
/// and a preflight max-age of 1800 seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossOrigin {
    origins: Vec<String>,
    methods: Vec<Method>,
    allowed_headers: Vec<String>,
    exposed_headers: Vec<String>,
    allow_credentials: bool,
    max_age: u64,
}

impl Default for CrossOrigin {
    fn default() -> Self {
        Self {
            origins: Vec::new(),
            methods: Vec::new(),
            allowed_headers: vec![ALL.to_string()],
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl CrossOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// Replaces the default `*` with an explicit list on first use.
    pub fn allowed_header(mut self, header: impl Into<String>) -> Self {
        if self.allowed_headers == [ALL] {
            self.allowed_headers.clear();
        }
        self.allowed_headers.push(header.into());
        self
    }

    pub fn exposed_header(mut self, header: impl Into<String>) -> Self {
        self.exposed_headers.push(header.into());
        self
    }

    pub fn allow_credentials(mut self, allow_credentials: bool) -> Self {
        self.allow_credentials = allow_credentials;
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn allowed_headers(&self) -> &[String] {
        &self.allowed_headers
    }

    pub fn exposed_headers(&self) -> &[String] {
        &self.exposed_headers
    }

    pub fn is_allow_credentials(&self) -> bool {
        self.allow_credentials
    }

    pub fn get_max_age(&self) -> u64 {
        self.max_age
    }

    /// An empty origin list or a `*` entry allows every origin.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.origins.is_empty() || self.origins.iter().any(|allowed| allowed == ALL || allowed.eq_ignore_ascii_case(origin))
    }

    /// The policy's methods, or the mapping's own methods when the policy names none.
    pub fn allowed_methods<'a>(&'a self, mapping: &'a Mapping) -> &'a [Method] {
        if self.methods.is_empty() { mapping.methods() } else { &self.methods }
    }

    /// The subset of `requested` headers this policy allows, in request order.
    pub fn allowed_request_headers<'a>(&self, requested: &[&'a str]) -> Vec<&'a str> {
        if self.allowed_headers.iter().any(|header| header == ALL) {
            return requested.to_vec();
        }
        requested
            .iter()
            .filter(|header| self.allowed_headers.iter().any(|allowed| allowed.eq_ignore_ascii_case(header)))
            .copied()
            .collect()
    }

    /// Adds the headers an allowed actual (non-preflight) request answers with.
    pub(crate) fn apply_actual(&self, origin: &HeaderValue, headers: &mut HeaderMap) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        if self.allow_credentials {
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if let Some(exposed) = join_header(self.exposed_headers.iter()) {
            headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, exposed);
        }
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }
}

/// The synthetic handler answering `OPTIONS` requests for a set of candidate routes.
#[derive(Debug)]
pub struct OptionsHandler<'r> {
    candidates: Vec<&'r Route>,
}

impl<'r> OptionsHandler<'r> {
    pub(crate) fn new(candidates: Vec<&'r Route>) -> Self {
        Self { candidates }
    }

    pub fn handle(&self, req: &Request) -> Response<ResponseBody> {
        match self.preflight(req) {
            Some(response) => response,
            None => {
                debug!(path = %req.path(), "reject invalid CORS preflight request");
                forbidden()
            }
        }
    }

    fn preflight(&self, req: &Request) -> Option<Response<ResponseBody>> {
        let origin = req.headers().get(ORIGIN).filter(|value| !value.is_empty())?;
        let requested_method = req.header_str(ACCESS_CONTROL_REQUEST_METHOD).map(str::trim).filter(|m| !m.is_empty())?;
        let requested_method = Method::from_bytes(requested_method.as_bytes()).ok()?;

        let route = self.candidates.iter().find(|route| route.mapping().supports_method(&requested_method))?;
        let policy = route.capabilities().cross_origin()?;

        let allowed_methods = policy.allowed_methods(route.mapping());
        if !allowed_methods.contains(&requested_method) {
            return None;
        }
        if !policy.is_origin_allowed(origin.to_str().ok()?) {
            return None;
        }

        let requested_headers = req
            .header_str(ACCESS_CONTROL_REQUEST_HEADERS)
            .map(|value| value.split(',').map(str::trim).filter(|header| !header.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default();
        let allowed_headers = policy.allowed_request_headers(&requested_headers);

        let mut response = text_response(StatusCode::OK, "OK");
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, join_header(allowed_methods.iter().map(Method::as_str))?);
        if let Some(value) = join_header(allowed_headers.iter()) {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
        }
        if policy.allow_credentials {
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if let Some(value) = join_header(policy.exposed_headers.iter()) {
            headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, value);
        }
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(policy.max_age));
        headers.insert(ALLOW, join_header(self.candidate_methods().iter().map(Method::as_str))?);
        headers.insert(VARY, HeaderValue::from_static("Origin"));
        Some(response)
    }

    fn candidate_methods(&self) -> Vec<Method> {
        let mut methods = Vec::new();
        for method in self.candidates.iter().flat_map(|route| route.mapping().methods()) {
            if !methods.contains(method) {
                methods.push(method.clone());
            }
        }
        methods
    }
}

/// The fixed rejection of an invalid CORS request.
pub fn forbidden() -> Response<ResponseBody> {
    let mut response = text_response(StatusCode::FORBIDDEN, "Invalid CORS request");
    if let Some(allow) = join_header(ALL_METHODS.iter().map(Method::as_str)) {
        response.headers_mut().insert(ALLOW, allow);
    }
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Joins values into a comma separated header value, `None` when there is nothing to join.
pub(crate) fn join_header<I, S>(values: I) -> Option<HeaderValue>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = values.into_iter().map(|value| value.as_ref().to_string()).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        return None;
    }
    HeaderValue::try_from(joined).ok()
}
