//! The request dispatcher.
//!
//! A request runs through: session slot, multipart resolution, mapping selection, interceptors,
//! handler invocation and view resolution. Failures anywhere are turned into a response by the
//! [`ExceptionResolver`]; the session is persisted and multipart temp files are released
//! whatever the outcome.
//!
//! # Example
//! ```
//! use http::{Method, StatusCode};
//! use micro_mvc::{Dispatcher, Mapping, RouteRegistry, handler_fn};
//!
//! async fn hello() -> &'static str {
//!     "hello"
//! }
//!
//! let registry = RouteRegistry::builder()
//!     .route(Mapping::builder().path("/hello").method(Method::GET).build().unwrap(), handler_fn(hello))
//!     .build();
//! let dispatcher = Dispatcher::builder(registry).build();
//!
//! let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let response = runtime.block_on(dispatcher.dispatch(http::Request::get("/hello").body(String::new()).unwrap()));
//! assert_eq!(response.status(), StatusCode::OK);
//! ```

use crate::body::ResponseBody;
use crate::error::{DispatchError, HandlerError};
use crate::exception::{DefaultExceptionResolver, ExceptionResolver, internal_server_error};
use crate::interceptor::{CacheInterceptor, CorsInterceptor, Interceptor, Interceptors, InterceptorsBuilder};
use crate::multipart::{MultipartConfig, MultipartResolver};
use crate::registry::RouteRegistry;
use crate::request::Request;
use crate::selector::{Selection, select};
use crate::session::{SessionConfig, SessionSlot, SessionStore};
use crate::view::{JsonMessageConverter, MessageConverter, Resolution, ViewResolver};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::Response;
use http_body::Body as HttpBody;
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

const DEFAULT_MAX_FORWARD_DEPTH: usize = 8;

struct SessionSupport {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

pub struct DispatcherBuilder {
    registry: RouteRegistry,
    interceptors: InterceptorsBuilder,
    multipart: Option<MultipartResolver>,
    converter: Option<Arc<dyn MessageConverter>>,
    exception_resolver: Box<dyn ExceptionResolver>,
    sessions: Option<SessionSupport>,
    max_forward_depth: usize,
}

impl DispatcherBuilder {
    fn new(registry: RouteRegistry) -> Self {
        Self {
            registry,
            interceptors: Interceptors::builder(),
            multipart: None,
            converter: Some(Arc::new(JsonMessageConverter)),
            exception_resolver: Box::new(DefaultExceptionResolver),
            sessions: None,
            max_forward_depth: DEFAULT_MAX_FORWARD_DEPTH,
        }
    }

    /// Appends an interceptor; application interceptors run after the CORS and cache checks.
    pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors = self.interceptors.add_last(interceptor);
        self
    }

    /// Prepends an interceptor to the application interceptors.
    pub fn interceptor_first<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors = self.interceptors.add_first(interceptor);
        self
    }

    pub fn multipart(mut self, config: MultipartConfig) -> Self {
        self.multipart = Some(MultipartResolver::new(config));
        self
    }

    pub fn message_converter<C: MessageConverter + 'static>(mut self, converter: C) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    /// Objects returned by handlers are written as plain text instead of being converted.
    pub fn no_message_converter(mut self) -> Self {
        self.converter = None;
        self
    }

    pub fn exception_resolver<R: ExceptionResolver + 'static>(mut self, resolver: R) -> Self {
        self.exception_resolver = Box::new(resolver);
        self
    }

    pub fn session_store<S: SessionStore + 'static>(mut self, store: S, config: SessionConfig) -> Self {
        self.sessions = Some(SessionSupport { store: Arc::new(store), config });
        self
    }

    pub fn max_forward_depth(mut self, max_forward_depth: usize) -> Self {
        self.max_forward_depth = max_forward_depth;
        self
    }

    pub fn build(self) -> Dispatcher {
        let interceptors = self.interceptors.add_first(CacheInterceptor).add_first(CorsInterceptor).build();
        Dispatcher {
            registry: self.registry,
            interceptors,
            multipart: self.multipart,
            view_resolver: ViewResolver::new(self.converter),
            exception_resolver: self.exception_resolver,
            sessions: self.sessions,
            max_forward_depth: self.max_forward_depth,
        }
    }
}

pub struct Dispatcher {
    registry: RouteRegistry,
    interceptors: Interceptors,
    multipart: Option<MultipartResolver>,
    view_resolver: ViewResolver,
    exception_resolver: Box<dyn ExceptionResolver>,
    sessions: Option<SessionSupport>,
    max_forward_depth: usize,
}

impl Dispatcher {
    pub fn builder(registry: RouteRegistry) -> DispatcherBuilder {
        DispatcherBuilder::new(registry)
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub async fn dispatch<B>(&self, request: http::Request<B>) -> Response<ResponseBody>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<HandlerError>,
    {
        self.serve(Request::from_http(request)).await
    }

    /// Dispatches an already converted request. Never fails: errors become responses.
    pub async fn serve(&self, mut req: Request) -> Response<ResponseBody> {
        debug!(method = %req.method(), path = %req.path(), "dispatch request");

        if let Some(sessions) = &self.sessions {
            let slot = SessionSlot::new(Arc::clone(&sessions.store), sessions.config.clone(), req.headers());
            req.set_session_slot(slot);
        }

        let result = AssertUnwindSafe(self.handle(&mut req)).catch_unwind().await.unwrap_or_else(|panic| {
            Err(DispatchError::server_internal(format!("handler panicked: {}", panic_message(panic.as_ref()))).into())
        });

        let mut response = match result {
            Ok(response) => response,
            Err(e) => self.resolve_exception(&req, &e),
        };

        req.session_slot().persist(response.headers_mut()).await;

        if let (Some(resolver), Some(multipart)) = (&self.multipart, req.multipart()) {
            resolver.cleanup(multipart).await;
        }

        debug!(method = %req.method(), path = %req.path(), status = %response.status(), "dispatched request");
        response
    }

    async fn handle(&self, req: &mut Request) -> Result<Response<ResponseBody>, HandlerError> {
        if let Some(resolver) = &self.multipart
            && resolver.is_multipart(req)
        {
            let multipart = resolver.resolve(req).await?;
            req.set_multipart(Arc::new(multipart));
        }
        self.process(req).await
    }

    fn process<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Result<Response<ResponseBody>, HandlerError>> {
        Box::pin(async move {
            let route = match select(&self.registry, req)? {
                Selection::Options(handler) => return Ok(handler.handle(req)),
                Selection::Route(route) => route,
            };

            if let Some(response) = self.interceptors.pre_handle(req, route).await? {
                debug!(path = %req.path(), status = %response.status(), "request short-circuited by interceptor");
                return Ok(response);
            }

            let view = route.handler().invoke(req).await?;

            match self.view_resolver.resolve(&view, req.resolved_produces())? {
                Resolution::Response(mut response) => {
                    self.interceptors.post_handle(req, route, &mut response).await?;
                    Ok(response)
                }
                Resolution::Forward(path) => {
                    if req.forward_depth() >= self.max_forward_depth {
                        let reason = format!("forward depth {} exceeded at '{path}'", self.max_forward_depth);
                        return Err(DispatchError::server_internal(reason).into());
                    }
                    debug!(from = %req.path(), to = %path, "forward request");
                    let mut forwarded = req.forwarded(&path)?;
                    self.process(&mut forwarded).await
                }
            }
        })
    }

    fn resolve_exception(&self, req: &Request, e: &HandlerError) -> Response<ResponseBody> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.exception_resolver.resolve(req, e))) {
            Ok(Ok(response)) => response,
            Ok(Err(resolver_error)) => {
                error!(cause = %e, resolver_cause = %resolver_error, "exception resolver failed");
                internal_server_error()
            }
            Err(panic) => {
                error!(cause = %e, panic = %panic_message(panic.as_ref()), "exception resolver panicked");
                internal_server_error()
            }
        }
    }
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("interceptors", &self.interceptors.len())
            .field("multipart", &self.multipart)
            .field("sessions", &self.sessions.as_ref().map(|sessions| &sessions.config))
            .field("max_forward_depth", &self.max_forward_depth)
            .finish_non_exhaustive()
    }
}

impl Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder").field("registry", &self.registry).finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
