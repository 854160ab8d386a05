//! Mapping selection: which route answers a request.
//!
//! Selection is two-phase. Routes owning a literal path equal to the request path are tried
//! first; only when there are none are templated paths matched segment by segment. A literal
//! `/users/admin` therefore always wins over `/users/{id}`.
//!
//! Among the candidates of the winning phase the first, in registration order, whose method set
//! contains the request method is selected and its predicates are validated. `OPTIONS` requests
//! skip method narrowing and are answered by a synthetic [`OptionsHandler`].

use crate::cors::OptionsHandler;
use crate::error::DispatchError;
use crate::mapping::{matches, normalize_path, resolved_produces, split_path};
use crate::registry::{Route, RouteRegistry};
use crate::request::{PathVariables, Request, ResolvedProduces};
use http::Method;
use tracing::trace;

/// The handler chosen for a request.
#[derive(Debug)]
pub enum Selection<'r> {
    Route(&'r Route),
    Options(OptionsHandler<'r>),
}

/// Selects the handler for `req`, binding its path variables and the resolved `produces`
/// media type on the request.
pub fn select<'r>(registry: &'r RouteRegistry, req: &mut Request) -> Result<Selection<'r>, DispatchError> {
    let path = req.path().to_string();
    let request_segments = split_path(&path).collect::<Vec<_>>();

    let mut candidates = registry.exact_matches(&normalize_path(&path)).map(|route| (route, None)).collect::<Vec<_>>();
    if candidates.is_empty() {
        candidates = templated_matches(registry, &request_segments);
    }

    if candidates.is_empty() {
        return Err(DispatchError::not_found(path));
    }

    if req.method() == Method::OPTIONS {
        trace!(path = %path, candidates = candidates.len(), "answer OPTIONS with synthetic handler");
        return Ok(Selection::Options(OptionsHandler::new(candidates.into_iter().map(|(route, _)| route).collect())));
    }

    let Some((route, variables)) = candidates.iter().find(|(route, _)| route.mapping().supports_method(req.method()))
    else {
        let mut allowed: Vec<Method> = Vec::new();
        for method in candidates.iter().flat_map(|(route, _)| route.mapping().methods()) {
            if !allowed.contains(method) {
                allowed.push(method.clone());
            }
        }
        return Err(DispatchError::method_not_supported(req.method().clone(), allowed));
    };

    route.mapping().validate(req.params(), req.headers())?;

    if let Some(variables) = variables {
        req.set_path_variables(variables.clone());
    }
    if let Some(produces) = resolved_produces(route.mapping().produces()) {
        req.attributes_mut().insert(ResolvedProduces(produces.clone()));
    }

    trace!(mapping = %route.mapping(), "selected route");
    Ok(Selection::Route(*route))
}

fn templated_matches<'r>(
    registry: &'r RouteRegistry,
    request_segments: &[&str],
) -> Vec<(&'r Route, Option<PathVariables>)> {
    registry
        .routes()
        .iter()
        .filter_map(|route| {
            route
                .mapping()
                .paths()
                .iter()
                .find(|rule| matches(rule.segments(), request_segments))
                .map(|rule| (route, Some(PathVariables::from(rule.extract_variables(request_segments)))))
        })
        .collect()
}
