//! Interceptors around handler invocation.
//!
//! `pre_handle` runs after a route was selected and before its handler; returning a response
//! short-circuits the rest of the pipeline. `post_handle` runs on the resolved response of a
//! handler that was invoked, in reverse registration order. The dispatcher always installs [`CorsInterceptor`] and
//! [`CacheInterceptor`] ahead of the application's interceptors.

mod cache;
mod cors;

pub use cache::CacheInterceptor;
pub use cors::CorsInterceptor;

use crate::body::ResponseBody;
use crate::error::HandlerError;
use crate::registry::Route;
use crate::request::Request;
use async_trait::async_trait;
use http::Response;

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn pre_handle(&self, _req: &Request, _route: &Route) -> Result<Option<Response<ResponseBody>>, HandlerError> {
        Ok(None)
    }

    async fn post_handle(
        &self,
        _req: &Request,
        _route: &Route,
        _resp: &mut Response<ResponseBody>,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

pub struct Interceptors {
    inner: Vec<Box<dyn Interceptor>>,
}

#[async_trait]
impl Interceptor for Interceptors {
    async fn pre_handle(&self, req: &Request, route: &Route) -> Result<Option<Response<ResponseBody>>, HandlerError> {
        for interceptor in self.inner.iter() {
            if let Some(response) = interceptor.pre_handle(req, route).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    async fn post_handle(
        &self,
        req: &Request,
        route: &Route,
        resp: &mut Response<ResponseBody>,
    ) -> Result<(), HandlerError> {
        for interceptor in self.inner.iter().rev() {
            interceptor.post_handle(req, route, resp).await?;
        }
        Ok(())
    }
}

impl Interceptors {
    pub fn builder() -> InterceptorsBuilder {
        InterceptorsBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[derive(Default)]
pub struct InterceptorsBuilder {
    inner: Vec<Box<dyn Interceptor>>,
}

impl InterceptorsBuilder {
    fn new() -> Self {
        Self { inner: vec![] }
    }

    pub fn add_last<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.inner.push(Box::new(interceptor));
        self
    }

    pub fn add_first<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.inner.insert(0, Box::new(interceptor));
        self
    }

    pub fn build(self) -> Interceptors {
        Interceptors { inner: self.inner }
    }
}
