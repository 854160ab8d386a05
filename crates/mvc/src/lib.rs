//! The request dispatch and routing engine of the micro web framework.
//!
//! Handlers are registered with declarative [`Mapping`] rules into a [`RouteRegistry`]; the
//! [`Dispatcher`] selects the handler of each request, runs conditional-GET and CORS checks,
//! invokes it and resolves its return value into a response.

mod body;
mod date;
mod dispatcher;
mod error;
mod exception;
mod fn_trait;
mod handler;
mod params;
mod registry;
mod request;
mod selector;

pub mod cors;
pub mod extract;
pub mod interceptor;
pub mod mapping;
pub mod multipart;
pub mod session;
pub mod view;

pub use body::BoxReqBody;
pub use body::RequestBody;
pub use body::ResponseBody;
pub use dispatcher::Dispatcher;
pub use dispatcher::DispatcherBuilder;
pub use error::DispatchError;
pub use error::HandlerError;
pub use error::RuleParseError;
pub use error::SessionError;
pub use exception::DefaultExceptionResolver;
pub use exception::ExceptionResolver;
pub use fn_trait::FnTrait;
pub use handler::FnHandler;
pub use handler::RequestHandler;
pub use handler::handler_fn;
pub use mapping::Mapping;
pub use params::ParamMap;
pub use registry::HandlerCapabilities;
pub use registry::Route;
pub use registry::RouteRegistry;
pub use registry::RouteRegistryBuilder;
pub use registry::Scope;
pub use request::PathVariables;
pub use request::Request;
pub use request::ResolvedProduces;
pub use selector::Selection;
pub use selector::select;
pub use view::IntoView;
pub use view::View;
