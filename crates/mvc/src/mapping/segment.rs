//! Path templates and the segment-wise path matcher.
//!
//! A path such as `/users/{id}/posts` is split on `/` into segments, dropping empty
//! leading and trailing parts. A segment containing both `{` and `}` is *templated*:
//! it matches any literal value at the same position and binds that value to the
//! variable name written between the braces. No segment ever spans more than one
//! path component.

use crate::error::RuleParseError;
use std::fmt::{Display, Formatter};

/// One component of a path rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Template { raw: String, name: String },
}

impl Segment {
    /// Parses a single path component.
    pub fn parse(raw: &str) -> Result<Self, RuleParseError> {
        match (raw.find('{'), raw.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                let name = raw[start + 1..end].trim();
                if name.is_empty() {
                    return Err(RuleParseError::InvalidPath { path: raw.to_string(), reason: "empty variable name" });
                }
                Ok(Segment::Template { raw: raw.to_string(), name: name.to_string() })
            }
            (Some(_), Some(_)) => {
                Err(RuleParseError::InvalidPath { path: raw.to_string(), reason: "'}' appears before '{'" })
            }
            _ => Ok(Segment::Literal(raw.to_string())),
        }
    }

    #[inline]
    pub fn is_template(&self) -> bool {
        matches!(self, Segment::Template { .. })
    }

    /// The textual form of this segment as written in the rule.
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Literal(literal) => literal,
            Segment::Template { raw, .. } => raw,
        }
    }

    /// A templated segment matches any literal, a literal segment only itself.
    #[inline]
    pub fn matches(&self, request_segment: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == request_segment,
            Segment::Template { .. } => true,
        }
    }
}

/// An ordered list of segments describing one path a mapping answers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PathRule {
    segments: Vec<Segment>,
}

impl PathRule {
    pub fn parse(path: &str) -> Result<Self, RuleParseError> {
        let segments = split_path(path).map(Segment::parse).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns true if no segment of this rule is templated.
    pub fn is_literal(&self) -> bool {
        !self.segments.iter().any(Segment::is_template)
    }

    /// Concatenates `self` (the parent) with `child`.
    pub fn join(&self, child: &PathRule) -> PathRule {
        let mut segments = Vec::with_capacity(self.segments.len() + child.segments.len());
        segments.extend(self.segments.iter().cloned());
        segments.extend(child.segments.iter().cloned());
        PathRule { segments }
    }

    /// Binds every templated segment's name to the literal at the same request position.
    ///
    /// The caller must have checked [`matches`] first.
    pub fn extract_variables(&self, request_segments: &[&str]) -> Vec<(String, String)> {
        self.segments
            .iter()
            .zip(request_segments)
            .filter_map(|(segment, value)| match segment {
                Segment::Template { name, .. } => Some((name.clone(), (*value).to_string())),
                Segment::Literal(_) => None,
            })
            .collect()
    }
}

impl Display for PathRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment.as_str())?;
        }
        Ok(())
    }
}

/// Splits a path into its non-empty components.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// Normalizes a request path to the same textual form [`PathRule`] displays.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for part in split_path(path) {
        normalized.push('/');
        normalized.push_str(part);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Matches a rule's segments against the request's segments.
///
/// Lengths must agree, and each position must either be literally equal or be a
/// templated rule segment.
pub fn matches(rule_segments: &[Segment], request_segments: &[&str]) -> bool {
    if rule_segments.len() != request_segments.len() {
        return false;
    }

    rule_segments.iter().zip(request_segments).all(|(rule, request)| rule.matches(request))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> Vec<&str> {
        split_path(path).collect()
    }

    #[test]
    fn parse_literal_and_template_segments() {
        let rule = PathRule::parse("/users/{id}/posts/").unwrap();
        assert_eq!(rule.segments().len(), 3);
        assert_eq!(rule.segments()[0], Segment::Literal("users".into()));
        assert_eq!(rule.segments()[1], Segment::Template { raw: "{id}".into(), name: "id".into() });
        assert!(!rule.is_literal());
        assert_eq!(rule.to_string(), "/users/{id}/posts");
    }

    #[test]
    fn reject_bad_templates() {
        assert!(Segment::parse("{}").is_err());
        assert!(Segment::parse("}id{").is_err());
    }

    #[test]
    fn root_path() {
        let rule = PathRule::parse("/").unwrap();
        assert!(rule.segments().is_empty());
        assert_eq!(rule.to_string(), "/");
        assert!(matches(rule.segments(), &request("/")));
        assert_eq!(normalize_path("//"), "/");
    }

    #[test]
    fn length_mismatch_never_matches() {
        let rule = PathRule::parse("/users/{id}").unwrap();
        assert!(!matches(rule.segments(), &request("/users")));
        assert!(!matches(rule.segments(), &request("/users/1/posts")));
    }

    #[test]
    fn template_matches_any_literal() {
        let rule = PathRule::parse("/users/{id}").unwrap();
        assert!(matches(rule.segments(), &request("/users/42")));
        assert!(matches(rule.segments(), &request("/users/admin/")));
        assert!(!matches(rule.segments(), &request("/groups/42")));
    }

    #[test]
    fn extract_path_variables() {
        let rule = PathRule::parse("/users/{id}/posts/{postId}").unwrap();
        let segments = request("/users/42/posts/7");
        assert!(matches(rule.segments(), &segments));

        let variables = rule.extract_variables(&segments);
        assert_eq!(variables, vec![("id".to_string(), "42".to_string()), ("postId".to_string(), "7".to_string())]);
    }

    #[test]
    fn join_parent_and_child() {
        let parent = PathRule::parse("/api").unwrap();
        let child = PathRule::parse("/users/{id}").unwrap();
        assert_eq!(parent.join(&child).to_string(), "/api/users/{id}");
        assert_eq!(PathRule::default().join(&child).to_string(), "/users/{id}");
    }
}
