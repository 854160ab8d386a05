//! Conditional GET support.
//!
//! For `GET` and `HEAD` requests on routes that expose an ETag and/or a last-modified time, the
//! validators are evaluated in this order:
//! 1. `If-Unmodified-Since` with a known last-modified time that is not strictly earlier:
//!    `412 Precondition Failed`
//! 2. both validators known, both `If-Modified-Since` and `If-None-Match` present, both
//!    unchanged: `304 Not Modified` with `Cache-Control`, `Last-Modified` and `ETag`
//! 3. `If-Modified-Since` without `If-None-Match`, unchanged: `304 Not Modified` with
//!    `Cache-Control` and `Last-Modified`
//!
//! Otherwise the handler runs and its response carries the known validators.

use crate::body::ResponseBody;
use crate::date::{http_date_value, parse_http_date, truncate_to_seconds};
use crate::error::HandlerError;
use crate::interceptor::Interceptor;
use crate::registry::Route;
use crate::request::Request;
use async_trait::async_trait;
use http::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE, LAST_MODIFIED};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use std::time::SystemTime;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheInterceptor;

struct Validators {
    etag: Option<String>,
    last_modified: Option<SystemTime>,
}

impl CacheInterceptor {
    fn validators(req: &Request, route: &Route) -> Option<Validators> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return None;
        }
        let capabilities = route.capabilities();
        let validators =
            Validators { etag: capabilities.etag_of(req), last_modified: capabilities.last_modified_of(req) };
        if validators.etag.is_none() && validators.last_modified.is_none() {
            return None;
        }
        Some(validators)
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    async fn pre_handle(&self, req: &Request, route: &Route) -> Result<Option<Response<ResponseBody>>, HandlerError> {
        let Some(validators) = Self::validators(req, route) else {
            return Ok(None);
        };
        let headers = req.headers();

        if let (Some(last_modified), Some(since)) =
            (validators.last_modified, headers.get(IF_UNMODIFIED_SINCE).and_then(parse_http_date))
            && last_modified >= since
        {
            debug!(path = %req.path(), "precondition If-Unmodified-Since failed");
            let mut response = Response::new(ResponseBody::empty());
            *response.status_mut() = StatusCode::PRECONDITION_FAILED;
            return Ok(Some(response));
        }

        let modified_since = headers.get(IF_MODIFIED_SINCE).and_then(parse_http_date);
        let none_match = headers.get(IF_NONE_MATCH);

        match (&validators.etag, validators.last_modified, modified_since, none_match) {
            (Some(etag), Some(last_modified), Some(since), Some(none_match)) => {
                if !modified_since_unchanged(since, last_modified) || !none_match_unchanged(none_match, etag) {
                    return Ok(None);
                }
                debug!(path = %req.path(), "not modified by If-Modified-Since and If-None-Match");
                let mut response = not_modified(last_modified);
                if let Ok(etag) = HeaderValue::try_from(etag.as_str()) {
                    response.headers_mut().insert(ETAG, etag);
                }
                Ok(Some(response))
            }
            (_, Some(last_modified), Some(since), None) if modified_since_unchanged(since, last_modified) => {
                debug!(path = %req.path(), "not modified by If-Modified-Since");
                Ok(Some(not_modified(last_modified)))
            }
            _ => Ok(None),
        }
    }

    async fn post_handle(
        &self,
        req: &Request,
        route: &Route,
        resp: &mut Response<ResponseBody>,
    ) -> Result<(), HandlerError> {
        if let Some(validators) = Self::validators(req, route) {
            attach(resp.headers_mut(), &validators);
        }
        Ok(())
    }
}

/// The resource is unchanged if the client's copy is at least as new, to the second.
fn modified_since_unchanged(since: SystemTime, last_modified: SystemTime) -> bool {
    since >= truncate_to_seconds(last_modified)
}

fn none_match_unchanged(none_match: &HeaderValue, etag: &str) -> bool {
    none_match.to_str().is_ok_and(|value| value.trim().eq_ignore_ascii_case(etag))
}

fn not_modified(last_modified: SystemTime) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    response.headers_mut().insert(CACHE_CONTROL, HeaderValue::from_static("public"));
    response.headers_mut().insert(LAST_MODIFIED, http_date_value(last_modified));
    response
}

fn attach(headers: &mut HeaderMap, validators: &Validators) {
    if let Some(last_modified) = validators.last_modified
        && !headers.contains_key(LAST_MODIFIED)
    {
        headers.insert(LAST_MODIFIED, http_date_value(last_modified));
    }
    if let Some(etag) = &validators.etag
        && !headers.contains_key(ETAG)
        && let Ok(etag) = HeaderValue::try_from(etag.as_str())
    {
        headers.insert(ETAG, etag);
    }
    if !headers.contains_key(CACHE_CONTROL) {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("public"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RequestBody;
    use crate::handler::handler_fn;
    use crate::mapping::Mapping;
    use crate::registry::HandlerCapabilities;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    // Sun, 06 Nov 1994 08:49:37 GMT, plus 250ms
    const MODIFIED_SECS: u64 = 784111777;

    async fn noop() {}

    fn last_modified() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(MODIFIED_SECS) + Duration::from_millis(250)
    }

    fn route(etag: bool, modified: bool) -> Route {
        let mut capabilities = HandlerCapabilities::new();
        if etag {
            capabilities = capabilities.etag(|_| Some("\"abc\"".to_string()));
        }
        if modified {
            capabilities = capabilities.last_modified(|_| Some(last_modified()));
        }
        let mapping = Mapping::builder().path("/doc").method(Method::GET).build().unwrap();
        Route::new(mapping, Arc::new(handler_fn(noop)), capabilities)
    }

    fn request(method: Method, headers: &[(&'static str, &'static str)]) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/doc");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        Request::new(parts, RequestBody::empty())
    }

    async fn pre(route: &Route, req: &Request) -> Option<StatusCode> {
        CacheInterceptor.pre_handle(req, route).await.unwrap().map(|response| response.status())
    }

    #[tokio::test]
    async fn unmodified_since_earlier_than_last_modified_fails() {
        let route = route(true, true);
        let req = request(
            Method::GET,
            &[("if-unmodified-since", "Sun, 06 Nov 1994 08:49:30 GMT"), ("if-none-match", "\"abc\"")],
        );
        assert_eq!(pre(&route, &req).await, Some(StatusCode::PRECONDITION_FAILED));

        // same second: last-modified keeps its milliseconds, so it is not strictly earlier
        let req = request(Method::GET, &[("if-unmodified-since", "Sun, 06 Nov 1994 08:49:37 GMT")]);
        assert_eq!(pre(&route, &req).await, Some(StatusCode::PRECONDITION_FAILED));

        let req = request(Method::GET, &[("if-unmodified-since", "Sun, 06 Nov 1994 08:49:38 GMT")]);
        assert_eq!(pre(&route, &req).await, None);
    }

    #[tokio::test]
    async fn both_validators_unchanged_is_not_modified() {
        let route = route(true, true);
        let req = request(
            Method::GET,
            &[("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT"), ("if-none-match", "\"ABC\"")],
        );
        let response = CacheInterceptor.pre_handle(&req, &route).await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[CACHE_CONTROL], "public");
        assert_eq!(response.headers()[LAST_MODIFIED], "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(response.headers()[ETAG], "\"abc\"");

        let req = request(
            Method::GET,
            &[("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT"), ("if-none-match", "\"other\"")],
        );
        assert_eq!(pre(&route, &req).await, None);
    }

    #[tokio::test]
    async fn etag_alone_does_not_short_circuit() {
        let route = route(true, true);
        let req = request(Method::GET, &[("if-none-match", "\"abc\"")]);
        assert_eq!(pre(&route, &req).await, None);

        let route = self::route(true, false);
        let req = request(
            Method::GET,
            &[("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT"), ("if-none-match", "\"abc\"")],
        );
        assert_eq!(pre(&route, &req).await, None);
    }

    #[tokio::test]
    async fn modified_since_alone() {
        let route = route(false, true);
        let req = request(Method::GET, &[("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT")]);
        let response = CacheInterceptor.pre_handle(&req, &route).await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.headers().get(ETAG).is_none());

        let req = request(Method::GET, &[("if-modified-since", "Sun, 06 Nov 1994 08:49:36 GMT")]);
        assert_eq!(pre(&route, &req).await, None);

        let req = request(Method::GET, &[("if-modified-since", "not a date")]);
        assert_eq!(pre(&route, &req).await, None);
    }

    #[tokio::test]
    async fn only_get_and_head_are_checked() {
        let route = route(false, true);
        let req = request(Method::POST, &[("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT")]);
        assert_eq!(pre(&route, &req).await, None);

        let req = request(Method::HEAD, &[("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT")]);
        assert_eq!(pre(&route, &req).await, Some(StatusCode::NOT_MODIFIED));
    }

    #[tokio::test]
    async fn post_handle_attaches_validators() {
        let route = route(true, true);
        let req = request(Method::GET, &[]);
        let mut response = Response::new(ResponseBody::from("body"));
        CacheInterceptor.post_handle(&req, &route, &mut response).await.unwrap();

        assert_eq!(response.headers()[ETAG], "\"abc\"");
        assert_eq!(response.headers()[LAST_MODIFIED], "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(response.headers()[CACHE_CONTROL], "public");

        let route = self::route(false, false);
        let mut response = Response::new(ResponseBody::empty());
        CacheInterceptor.post_handle(&req, &route, &mut response).await.unwrap();
        assert!(response.headers().is_empty());
    }
}
