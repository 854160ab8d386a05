//! Media type rules used by `consumes` and `produces` narrowing.

use crate::error::{DispatchError, RuleParseError};
use http::HeaderMap;
use mime::Mime;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A media type pattern, optionally negated with a leading `!`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaTypeRule {
    media_type: Mime,
    negated: bool,
}

impl MediaTypeRule {
    pub fn new(media_type: Mime, negated: bool) -> Self {
        Self { media_type, negated }
    }

    pub fn media_type(&self) -> &Mime {
        &self.media_type
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }
}

impl FromStr for MediaTypeRule {
    type Err = RuleParseError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err(RuleParseError::Empty);
        }

        let (negated, text) = match rule.strip_prefix('!') {
            Some(text) => (true, text.trim()),
            None => (false, rule),
        };

        let media_type = text.parse::<Mime>().map_err(|_| RuleParseError::InvalidMediaType { rule: rule.to_string() })?;
        Ok(Self { media_type, negated })
    }
}

impl Display for MediaTypeRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        f.write_str(self.media_type.essence_str())
    }
}

/// Returns true if `pattern` covers `other`: `*/*` covers everything, `text/*` covers `text/plain`.
///
/// Parameters such as `charset` or `q` are ignored.
pub fn includes(pattern: &Mime, other: &Mime) -> bool {
    if pattern.type_() == mime::STAR {
        return true;
    }
    if pattern.type_() != other.type_() {
        return false;
    }
    pattern.subtype() == mime::STAR || pattern.subtype() == other.subtype()
}

/// Two media types are compatible if either one covers the other.
pub fn is_compatible(a: &Mime, b: &Mime) -> bool {
    includes(a, b) || includes(b, a)
}

/// Collects the media types a client accepts. A missing `Accept` header means `*/*`;
/// entries with `q=0` and entries that do not parse are dropped.
pub fn accepted_media_types(headers: &HeaderMap) -> Vec<Mime> {
    let mut values = headers.get_all(http::header::ACCEPT).iter().peekable();
    if values.peek().is_none() {
        return vec![mime::STAR_STAR];
    }

    values
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|part| part.trim().parse::<Mime>().ok())
        .filter(|media_type| media_type.get_param("q").is_none_or(|q| q.as_str().parse::<f32>().map_or(true, |q| q > 0.0)))
        .collect()
}

/// Checks the request's `Content-Type` against `consumes` rules.
///
/// Negated rules reject a matching content type, the plain rules are OR'd. A request
/// without `Content-Type` is treated as `application/octet-stream`.
pub fn validate_consumes(rules: &[MediaTypeRule], headers: &HeaderMap) -> Result<(), DispatchError> {
    if rules.is_empty() {
        return Ok(());
    }

    let content_type = match headers.get(http::header::CONTENT_TYPE) {
        Some(value) => {
            let text = value.to_str().map_err(|_| DispatchError::content_not_supported("<non-ascii>"))?;
            text.parse::<Mime>().map_err(|_| DispatchError::content_not_supported(text))?
        }
        None => mime::APPLICATION_OCTET_STREAM,
    };

    let mut has_positive = false;
    let mut positive_matched = false;
    for rule in rules {
        let matched = includes(rule.media_type(), &content_type);
        if rule.is_negated() {
            if matched {
                return Err(DispatchError::content_not_supported(content_type.essence_str()));
            }
        } else {
            has_positive = true;
            positive_matched |= matched;
        }
    }

    if has_positive && !positive_matched {
        return Err(DispatchError::content_not_supported(content_type.essence_str()));
    }
    Ok(())
}

/// Checks `produces` rules against the client's `Accept` list.
///
/// Every plain rule needs a compatible accepted type; every negated rule must have none.
/// The polarity differs from [`validate_consumes`].
pub fn validate_produces(rules: &[MediaTypeRule], headers: &HeaderMap) -> Result<(), DispatchError> {
    if rules.is_empty() {
        return Ok(());
    }

    let accepted = accepted_media_types(headers);
    for rule in rules {
        let acceptable = accepted.iter().any(|accept| is_compatible(accept, rule.media_type()));
        if acceptable == rule.is_negated() {
            return Err(DispatchError::content_not_acceptable(rule));
        }
    }
    Ok(())
}

/// The media type a route answers with: the first non-negated `produces` rule.
pub fn resolved_produces(rules: &[MediaTypeRule]) -> Option<&Mime> {
    rules.iter().find(|rule| !rule.is_negated()).map(MediaTypeRule::media_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn rules(texts: &[&str]) -> Vec<MediaTypeRule> {
        texts.iter().map(|text| text.parse().unwrap()).collect()
    }

    fn headers(name: http::header::HeaderName, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn parse_negated_rule() {
        let rule: MediaTypeRule = "!text/html".parse().unwrap();
        assert!(rule.is_negated());
        assert_eq!(rule.media_type(), &mime::TEXT_HTML);
        assert_eq!(rule.to_string(), "!text/html");
        assert!("not a type".parse::<MediaTypeRule>().is_err());
    }

    #[test]
    fn wildcard_inclusion() {
        assert!(includes(&mime::STAR_STAR, &mime::TEXT_PLAIN));
        assert!(includes(&mime::TEXT_STAR, &mime::TEXT_HTML));
        assert!(!includes(&mime::TEXT_HTML, &mime::TEXT_STAR));
        assert!(is_compatible(&mime::TEXT_HTML, &mime::TEXT_STAR));
        assert!(includes(&mime::APPLICATION_JSON, &"application/json; charset=utf-8".parse().unwrap()));
    }

    #[test]
    fn consumes_positive_rules_are_ored() {
        let rules = rules(&["application/json", "application/xml"]);
        assert!(validate_consumes(&rules, &headers(http::header::CONTENT_TYPE, "application/xml")).is_ok());
        let error = validate_consumes(&rules, &headers(http::header::CONTENT_TYPE, "text/plain")).unwrap_err();
        assert!(matches!(error, DispatchError::ContentNotSupported { .. }));
    }

    #[test]
    fn consumes_negated_rule_rejects_matching_type() {
        let rules = rules(&["!text/*"]);
        assert!(validate_consumes(&rules, &headers(http::header::CONTENT_TYPE, "text/plain")).is_err());
        assert!(validate_consumes(&rules, &headers(http::header::CONTENT_TYPE, "application/json")).is_ok());
    }

    #[test]
    fn consumes_without_content_type_is_octet_stream() {
        assert!(validate_consumes(&rules(&["application/octet-stream"]), &HeaderMap::new()).is_ok());
        assert!(validate_consumes(&rules(&["application/json"]), &HeaderMap::new()).is_err());
    }

    #[test]
    fn produces_needs_compatible_accept() {
        let rules = rules(&["application/json"]);
        assert!(validate_produces(&rules, &headers(http::header::ACCEPT, "text/html, application/*;q=0.8")).is_ok());
        assert!(validate_produces(&rules, &HeaderMap::new()).is_ok());

        let error = validate_produces(&rules, &headers(http::header::ACCEPT, "text/html")).unwrap_err();
        assert!(matches!(error, DispatchError::ContentNotAcceptable { .. }));
    }

    #[test]
    fn produces_negated_rule_rejects_compatible_accept() {
        let rules = rules(&["!text/html"]);
        assert!(validate_produces(&rules, &headers(http::header::ACCEPT, "application/json")).is_ok());
        assert!(validate_produces(&rules, &headers(http::header::ACCEPT, "text/*")).is_err());
    }

    #[test]
    fn q_zero_is_not_accepted() {
        let accepted = accepted_media_types(&headers(http::header::ACCEPT, "text/html;q=0, application/json"));
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].essence_str(), "application/json");
    }

    #[test]
    fn first_positive_rule_is_resolved() {
        let rules = rules(&["!text/html", "application/json", "application/xml"]);
        assert_eq!(resolved_produces(&rules), Some(&mime::APPLICATION_JSON));
    }
}
