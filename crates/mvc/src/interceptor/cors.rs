//! Actual-request CORS checks.
//!
//! A request carrying `Origin` on a route with a cross-origin policy must use an allowed
//! method and origin, otherwise it is answered with `403 Forbidden`. Accepted responses get
//! `Access-Control-Allow-Origin` and, per policy, credentials and exposed headers.

use crate::body::ResponseBody;
use crate::cors::forbidden;
use crate::error::HandlerError;
use crate::interceptor::Interceptor;
use crate::registry::Route;
use crate::request::Request;
use async_trait::async_trait;
use http::header::ORIGIN;
use http::{Method, Response};
use tracing::debug;

/// Checks actual cross-origin requests against the route's CORS policy.
///
/// Requests without `Origin` and routes without a policy pass untouched; preflight requests
/// never reach interceptors.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorsInterceptor;

#[async_trait]
impl Interceptor for CorsInterceptor {
    async fn pre_handle(&self, req: &Request, route: &Route) -> Result<Option<Response<ResponseBody>>, HandlerError> {
        let (Some(policy), Some(origin)) = (route.capabilities().cross_origin(), req.header_str(ORIGIN)) else {
            return Ok(None);
        };
        if req.method() == Method::OPTIONS {
            return Ok(None);
        }

        let method_allowed = policy.allowed_methods(route.mapping()).contains(req.method());
        if !method_allowed || !policy.is_origin_allowed(origin) {
            debug!(origin = %origin, method = %req.method(), path = %req.path(), "reject cross-origin request");
            return Ok(Some(forbidden()));
        }
        Ok(None)
    }

    async fn post_handle(
        &self,
        req: &Request,
        route: &Route,
        resp: &mut Response<ResponseBody>,
    ) -> Result<(), HandlerError> {
        if let (Some(policy), Some(origin)) = (route.capabilities().cross_origin(), req.headers().get(ORIGIN)) {
            policy.apply_actual(origin, resp.headers_mut());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RequestBody;
    use crate::cors::CrossOrigin;
    use crate::handler::handler_fn;
    use crate::mapping::Mapping;
    use crate::registry::HandlerCapabilities;
    use http::StatusCode;
    use http::header::{ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, VARY};
    use std::sync::Arc;

    async fn noop() {}

    fn route(policy: Option<CrossOrigin>) -> Route {
        let mapping = Mapping::builder().path("/items").method(Method::GET).method(Method::POST).build().unwrap();
        let capabilities = match policy {
            Some(policy) => HandlerCapabilities::new().with_cross_origin(policy),
            None => HandlerCapabilities::new(),
        };
        Route::new(mapping, Arc::new(handler_fn(noop)), capabilities)
    }

    fn request(method: Method, origin: Option<&'static str>) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/items");
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        Request::new(parts, RequestBody::empty())
    }

    #[tokio::test]
    async fn rejects_foreign_origin() {
        let route = route(Some(CrossOrigin::new().origin("http://a.com")));
        let response = CorsInterceptor.pre_handle(&request(Method::GET, Some("http://b.com")), &route).await.unwrap();
        assert_eq!(response.unwrap().status(), StatusCode::FORBIDDEN);

        let response = CorsInterceptor.pre_handle(&request(Method::GET, Some("http://a.com")), &route).await.unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn rejects_method_outside_policy() {
        let route = route(Some(CrossOrigin::new().method(Method::GET)));
        let response = CorsInterceptor.pre_handle(&request(Method::POST, Some("http://a.com")), &route).await.unwrap();
        assert_eq!(response.unwrap().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn same_origin_and_unprotected_routes_pass() {
        let protected = route(Some(CrossOrigin::new().origin("http://a.com")));
        assert!(CorsInterceptor.pre_handle(&request(Method::GET, None), &protected).await.unwrap().is_none());

        let open = route(None);
        assert!(CorsInterceptor.pre_handle(&request(Method::GET, Some("http://b.com")), &open).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn decorates_allowed_response() {
        let route = route(Some(CrossOrigin::new().allow_credentials(true).exposed_header("x-total")));
        let req = request(Method::GET, Some("http://a.com"));
        let mut response = Response::new(ResponseBody::from("items"));
        CorsInterceptor.post_handle(&req, &route, &mut response).await.unwrap();

        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "http://a.com");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[ACCESS_CONTROL_EXPOSE_HEADERS], "x-total");
        assert_eq!(headers[VARY], "Origin");
    }
}
