//! The route registry: every registered handler with its mapping and capabilities.
//!
//! Routes are registered through [`RouteRegistryBuilder`], either standalone or grouped into a
//! [`Scope`] whose type-level mapping is merged into each of its routes. Once built the registry
//! is immutable and shared between requests.
//!
//! # Example
//! ```
//! use http::Method;
//! use micro_mvc::{Mapping, RouteRegistry, Scope, handler_fn};
//!
//! async fn list() -> &'static str {
//!     "users"
//! }
//!
//! let registry = RouteRegistry::builder()
//!     .scope(
//!         Scope::new(Mapping::builder().path("/users").build().unwrap())
//!             .route(Mapping::builder().method(Method::GET).build().unwrap(), handler_fn(list)),
//!     )
//!     .build();
//!
//! assert_eq!(registry.len(), 1);
//! ```

use crate::cors::CrossOrigin;
use crate::handler::RequestHandler;
use crate::mapping::{Mapping, normalize_path};
use crate::request::Request;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

pub type ETagFn = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;
pub type LastModifiedFn = Arc<dyn Fn(&Request) -> Option<SystemTime> + Send + Sync>;

/// What a handler supports beyond being invoked, fixed at registration.
#[derive(Clone, Default)]
pub struct HandlerCapabilities {
    pub(crate) etag: Option<ETagFn>,
    pub(crate) last_modified: Option<LastModifiedFn>,
    pub(crate) cross_origin: Option<CrossOrigin>,
}

impl HandlerCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current entity tag of the resource, `None` when unknown.
    pub fn etag<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        self.etag = Some(Arc::new(f));
        self
    }

    /// The last modification time of the resource, `None` when unknown.
    pub fn last_modified<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Option<SystemTime> + Send + Sync + 'static,
    {
        self.last_modified = Some(Arc::new(f));
        self
    }

    pub fn with_cross_origin(mut self, cross_origin: CrossOrigin) -> Self {
        self.cross_origin = Some(cross_origin);
        self
    }

    pub fn cross_origin(&self) -> Option<&CrossOrigin> {
        self.cross_origin.as_ref()
    }

    pub fn etag_of(&self, req: &Request) -> Option<String> {
        self.etag.as_ref().and_then(|f| f(req))
    }

    pub fn last_modified_of(&self, req: &Request) -> Option<SystemTime> {
        self.last_modified.as_ref().and_then(|f| f(req))
    }
}

impl Debug for HandlerCapabilities {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCapabilities")
            .field("etag", &self.etag.is_some())
            .field("last_modified", &self.last_modified.is_some())
            .field("cross_origin", &self.cross_origin)
            .finish()
    }
}

pub struct Route {
    mapping: Mapping,
    handler: Arc<dyn RequestHandler>,
    capabilities: HandlerCapabilities,
}

impl Route {
    pub fn new(mapping: Mapping, handler: Arc<dyn RequestHandler>, capabilities: HandlerCapabilities) -> Self {
        Self { mapping, handler, capabilities }
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn handler(&self) -> &Arc<dyn RequestHandler> {
        &self.handler
    }

    pub fn capabilities(&self) -> &HandlerCapabilities {
        &self.capabilities
    }
}

impl Debug for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route").field("mapping", &self.mapping).field("capabilities", &self.capabilities).finish()
    }
}

/// Routes sharing a type-level mapping and, optionally, a type-level CORS policy.
pub struct Scope {
    mapping: Mapping,
    cross_origin: Option<CrossOrigin>,
    routes: Vec<(Mapping, Arc<dyn RequestHandler>, HandlerCapabilities)>,
}

impl Scope {
    pub fn new(mapping: Mapping) -> Self {
        Self { mapping, cross_origin: None, routes: Vec::new() }
    }

    /// Applies to every route of the scope that does not declare its own policy.
    pub fn cross_origin(mut self, cross_origin: CrossOrigin) -> Self {
        self.cross_origin = Some(cross_origin);
        self
    }

    pub fn route<H: RequestHandler + 'static>(self, mapping: Mapping, handler: H) -> Self {
        self.route_with(mapping, handler, HandlerCapabilities::default())
    }

    pub fn route_with<H: RequestHandler + 'static>(
        mut self,
        mapping: Mapping,
        handler: H,
        capabilities: HandlerCapabilities,
    ) -> Self {
        self.routes.push((mapping, Arc::new(handler), capabilities));
        self
    }
}

pub struct RouteRegistry {
    routes: Vec<Route>,
    exact: HashMap<String, Vec<usize>>,
}

impl RouteRegistry {
    pub fn builder() -> RouteRegistryBuilder {
        RouteRegistryBuilder::new()
    }

    /// All routes in registration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Routes owning a literal path rule equal to `path`, in registration order.
    pub fn exact_matches(&self, path: &str) -> impl Iterator<Item = &Route> {
        self.exact.get(path).into_iter().flatten().map(|&index| &self.routes[index])
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Debug for RouteRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.routes.iter().map(|route| route.mapping.to_string())).finish()
    }
}

#[derive(Default)]
pub struct RouteRegistryBuilder {
    routes: Vec<Route>,
}

impl RouteRegistryBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn route<H: RequestHandler + 'static>(self, mapping: Mapping, handler: H) -> Self {
        self.route_with(mapping, handler, HandlerCapabilities::default())
    }

    pub fn route_with<H: RequestHandler + 'static>(
        mut self,
        mapping: Mapping,
        handler: H,
        capabilities: HandlerCapabilities,
    ) -> Self {
        self.routes.push(Route::new(mapping, Arc::new(handler), capabilities));
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        let Scope { mapping: parent, cross_origin, routes } = scope;
        for (mapping, handler, mut capabilities) in routes {
            if capabilities.cross_origin.is_none() {
                capabilities.cross_origin = cross_origin.clone();
            }
            self.routes.push(Route::new(parent.merge(&mapping), handler, capabilities));
        }
        self
    }

    pub fn build(self) -> RouteRegistry {
        let mut exact: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, route) in self.routes.iter().enumerate() {
            debug!(mapping = %route.mapping, "register route");
            for path in route.mapping.paths().iter().filter(|path| path.is_literal()) {
                let positions = exact.entry(normalize_path(&path.to_string())).or_default();
                if !positions.contains(&index) {
                    positions.push(index);
                }
            }
        }
        RouteRegistry { routes: self.routes, exact }
    }
}
