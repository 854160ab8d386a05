//! The rule model: what a route answers to.
//!
//! A [`Mapping`] bundles path rules, HTTP methods, parameter and header predicates and
//! `consumes`/`produces` media type rules. Mappings are immutable once built; a
//! type-level mapping is combined with each method-level mapping through [`Mapping::merge`]
//! when the route registry is built.
//!
//! # Example
//! ```
//! use micro_mvc::mapping::Mapping;
//! use http::Method;
//!
//! let mapping = Mapping::builder()
//!     .path("/users/{id}")
//!     .method(Method::GET)
//!     .param("!debug")
//!     .produces("application/json")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(mapping.paths()[0].to_string(), "/users/{id}");
//! ```

mod media_type;
mod predicate;
mod segment;

pub use media_type::{
    MediaTypeRule, accepted_media_types, includes, is_compatible, resolved_produces, validate_consumes,
    validate_produces,
};
pub use predicate::{KeyValues, PredicateRule};
pub use segment::{PathRule, Segment, matches, normalize_path, split_path};

use crate::error::{DispatchError, RuleParseError};
use crate::params::ParamMap;
use http::{HeaderMap, Method};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    paths: Vec<PathRule>,
    methods: Vec<Method>,
    params: Vec<PredicateRule>,
    headers: Vec<PredicateRule>,
    consumes: Vec<MediaTypeRule>,
    produces: Vec<MediaTypeRule>,
}

impl Mapping {
    pub fn builder() -> MappingBuilder {
        MappingBuilder::new()
    }

    pub fn paths(&self) -> &[PathRule] {
        &self.paths
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn params(&self) -> &[PredicateRule] {
        &self.params
    }

    pub fn headers(&self) -> &[PredicateRule] {
        &self.headers
    }

    pub fn consumes(&self) -> &[MediaTypeRule] {
        &self.consumes
    }

    pub fn produces(&self) -> &[MediaTypeRule] {
        &self.produces
    }

    /// An empty method set answers no method at all, only synthetic `OPTIONS` handling.
    pub fn supports_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Combines a type-level mapping (`self`) with a method-level `child`.
    ///
    /// - paths: every parent path joined with every child path, an empty side is neutral
    /// - methods, params, headers: union of both
    /// - consumes, produces: the child's rules when it declares any, otherwise the parent's
    pub fn merge(&self, child: &Mapping) -> Mapping {
        let paths = match (self.paths.is_empty(), child.paths.is_empty()) {
            (true, _) => child.paths.clone(),
            (false, true) => self.paths.clone(),
            (false, false) => self
                .paths
                .iter()
                .flat_map(|parent| child.paths.iter().map(|child| parent.join(child)))
                .fold(Vec::new(), push_unique),
        };

        Mapping {
            paths,
            methods: union(&self.methods, &child.methods),
            params: union(&self.params, &child.params),
            headers: union(&self.headers, &child.headers),
            consumes: override_or_inherit(&self.consumes, &child.consumes),
            produces: override_or_inherit(&self.produces, &child.produces),
        }
    }

    /// Runs parameter, header, consumes and produces checks against a request,
    /// in that order; the first failing rule aborts.
    pub fn validate(&self, params: &ParamMap, headers: &HeaderMap) -> Result<(), DispatchError> {
        if let Some(rule) = self.params.iter().find(|rule| !rule.test(params)) {
            return Err(DispatchError::param_validate(rule));
        }

        if let Some(rule) = self.headers.iter().find(|rule| !rule.test(headers)) {
            return Err(DispatchError::header_validate(rule));
        }

        validate_consumes(&self.consumes, headers)?;
        validate_produces(&self.produces, headers)
    }
}

fn push_unique<T: PartialEq>(mut vec: Vec<T>, item: T) -> Vec<T> {
    if !vec.contains(&item) {
        vec.push(item);
    }
    vec
}

fn union<T: PartialEq + Clone>(parent: &[T], child: &[T]) -> Vec<T> {
    parent.iter().chain(child).cloned().fold(Vec::with_capacity(parent.len() + child.len()), push_unique)
}

fn override_or_inherit<T: Clone>(parent: &[T], child: &[T]) -> Vec<T> {
    if child.is_empty() { parent.to_vec() } else { child.to_vec() }
}

impl Display for Mapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write_list(f, "", &self.methods)?;
        write_list(f, " ", &self.paths)?;
        if !self.params.is_empty() {
            write_list(f, " params=", &self.params)?;
        }
        if !self.headers.is_empty() {
            write_list(f, " headers=", &self.headers)?;
        }
        if !self.consumes.is_empty() {
            write_list(f, " consumes=", &self.consumes)?;
        }
        if !self.produces.is_empty() {
            write_list(f, " produces=", &self.produces)?;
        }
        Ok(())
    }
}

fn write_list<T: Display>(f: &mut Formatter<'_>, prefix: &str, items: &[T]) -> std::fmt::Result {
    f.write_str(prefix)?;
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

/// Builds a [`Mapping`] from textual rules. Parse errors are collected and reported by [`build`](Self::build).
#[derive(Debug, Default)]
pub struct MappingBuilder {
    mapping: Mapping,
    error: Option<RuleParseError>,
}

impl MappingBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn record<T>(&mut self, parsed: Result<T, RuleParseError>) -> Option<T> {
        match parsed {
            Ok(value) => Some(value),
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    pub fn path(mut self, path: &str) -> Self {
        if let Some(rule) = self.record(PathRule::parse(path)) {
            self.mapping.paths = push_unique(self.mapping.paths, rule);
        }
        self
    }

    pub fn paths<'a>(self, paths: impl IntoIterator<Item = &'a str>) -> Self {
        paths.into_iter().fold(self, MappingBuilder::path)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.mapping.methods = push_unique(self.mapping.methods, method);
        self
    }

    pub fn methods(self, methods: impl IntoIterator<Item = Method>) -> Self {
        methods.into_iter().fold(self, MappingBuilder::method)
    }

    /// Adds a method given by name, e.g. `"GET"`.
    pub fn method_name(mut self, method: &str) -> Self {
        let parsed = Method::from_bytes(method.trim().as_bytes())
            .map_err(|_| RuleParseError::InvalidMethod { method: method.to_string() });
        if let Some(method) = self.record(parsed) {
            self.mapping.methods = push_unique(self.mapping.methods, method);
        }
        self
    }

    pub fn param(mut self, rule: &str) -> Self {
        if let Some(rule) = self.record(rule.parse()) {
            self.mapping.params = push_unique(self.mapping.params, rule);
        }
        self
    }

    pub fn header(mut self, rule: &str) -> Self {
        if let Some(rule) = self.record(rule.parse()) {
            self.mapping.headers = push_unique(self.mapping.headers, rule);
        }
        self
    }

    pub fn consumes(mut self, rule: &str) -> Self {
        if let Some(rule) = self.record(rule.parse()) {
            self.mapping.consumes = push_unique(self.mapping.consumes, rule);
        }
        self
    }

    pub fn produces(mut self, rule: &str) -> Self {
        if let Some(rule) = self.record(rule.parse()) {
            self.mapping.produces = push_unique(self.mapping.produces, rule);
        }
        self
    }

    pub fn build(self) -> Result<Mapping, RuleParseError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.mapping),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn builder_reports_first_parse_error() {
        let error = Mapping::builder().path("/a").param("=x").header("!").build().unwrap_err();
        assert!(matches!(error, RuleParseError::InvalidPredicate { .. }));

        assert!(Mapping::builder().method_name("G ET").build().is_err());
        assert!(Mapping::builder().produces("json").build().is_err());
    }

    #[test]
    fn builder_deduplicates() {
        let mapping =
            Mapping::builder().path("/a").path("/a/").method(Method::GET).method_name("GET").build().unwrap();
        assert_eq!(mapping.paths().len(), 1);
        assert_eq!(mapping.methods(), &[Method::GET]);
    }

    #[test]
    fn merge_concatenates_paths() {
        let parent = Mapping::builder().paths(["/api", "/v1"]).build().unwrap();
        let child = Mapping::builder().path("/users/{id}").method(Method::GET).build().unwrap();

        let merged = parent.merge(&child);
        let paths = merged.paths().iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(paths, vec!["/api/users/{id}", "/v1/users/{id}"]);
        assert_eq!(merged.methods(), &[Method::GET]);

        let merged = Mapping::default().merge(&child);
        assert_eq!(merged.paths(), child.paths());

        let merged = parent.merge(&Mapping::default());
        assert_eq!(merged.paths(), parent.paths());
    }

    #[test]
    fn merge_unions_methods_params_and_headers() {
        let parent = Mapping::builder().method(Method::GET).param("a").header("x-a").build().unwrap();
        let child = Mapping::builder().method(Method::POST).param("b").param("a").header("x-b").build().unwrap();

        let merged = parent.merge(&child);
        assert_eq!(merged.methods(), &[Method::GET, Method::POST]);
        assert_eq!(merged.params().len(), 2);
        assert_eq!(merged.headers().len(), 2);
    }

    #[test]
    fn merge_overrides_media_types() {
        let parent = Mapping::builder().consumes("application/json").produces("application/json").build().unwrap();
        let child = Mapping::builder().produces("text/plain").build().unwrap();

        let merged = parent.merge(&child);
        assert_eq!(merged.consumes(), parent.consumes());
        assert_eq!(merged.produces(), child.produces());
    }

    #[test]
    fn validate_in_order() {
        let mapping = Mapping::builder()
            .param("action=save")
            .header("x-token")
            .consumes("application/json")
            .produces("application/json")
            .build()
            .unwrap();

        let mut headers = HeaderMap::new();
        let params = ParamMap::parse_query("action=load");
        assert!(matches!(mapping.validate(&params, &headers), Err(DispatchError::ParamValidate { .. })));

        let params = ParamMap::parse_query("action=save");
        assert!(matches!(mapping.validate(&params, &headers), Err(DispatchError::HeaderValidate { .. })));

        headers.insert("x-token", HeaderValue::from_static("t"));
        assert!(matches!(mapping.validate(&params, &headers), Err(DispatchError::ContentNotSupported { .. })));

        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(http::header::ACCEPT, HeaderValue::from_static("text/html"));
        assert!(matches!(mapping.validate(&params, &headers), Err(DispatchError::ContentNotAcceptable { .. })));

        headers.insert(http::header::ACCEPT, HeaderValue::from_static("*/*"));
        assert!(mapping.validate(&params, &headers).is_ok());
    }

    #[test]
    fn display() {
        let mapping = Mapping::builder().path("/a/{b}").method(Method::GET).param("!c").build().unwrap();
        assert_eq!(mapping.to_string(), "[GET] [/a/{b}] params=[!c]");
    }
}
