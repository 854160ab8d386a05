//! Presence/absence rules for request parameters and headers.
//!
//! The textual grammar is the usual one:
//!
//! | rule          | passes when                                          |
//! |---------------|------------------------------------------------------|
//! | `key`         | `key` is present with any value                      |
//! | `!key`        | `key` is absent                                      |
//! | `key=value`   | `key` is present and one of its values is `value`    |
//! | `key!=value`  | no value bound to `key` equals `value` (absent ok)   |

use crate::error::RuleParseError;
use crate::params::ParamMap;
use http::HeaderMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A read-only multimap a [`PredicateRule`] can be checked against.
pub trait KeyValues {
    fn contains(&self, key: &str) -> bool;

    /// Returns true if any value bound to `key` satisfies `pred`.
    fn any_value(&self, key: &str, pred: &mut dyn FnMut(&str) -> bool) -> bool;
}

impl KeyValues for HeaderMap {
    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }

    fn any_value(&self, key: &str, pred: &mut dyn FnMut(&str) -> bool) -> bool {
        self.get_all(key).iter().filter_map(|value| value.to_str().ok()).any(|value| pred(value))
    }
}

impl KeyValues for ParamMap {
    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }

    fn any_value(&self, key: &str, pred: &mut dyn FnMut(&str) -> bool) -> bool {
        self.get_all(key).any(|value| pred(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PredicateRule {
    /// `key=value`
    Equals { key: String, value: String },
    /// `key!=value`
    NotEquals { key: String, value: String },
    /// `key`
    Present { key: String },
    /// `!key`
    Absent { key: String },
}

impl PredicateRule {
    pub fn key(&self) -> &str {
        match self {
            Self::Equals { key, .. } | Self::NotEquals { key, .. } | Self::Present { key } | Self::Absent { key } => key,
        }
    }

    /// Checks this rule against the actual keys and values of a request.
    pub fn test<M: KeyValues + ?Sized>(&self, actual: &M) -> bool {
        match self {
            Self::Absent { key } => !actual.contains(key),
            Self::Present { key } => actual.contains(key),
            Self::NotEquals { key, value } => !actual.any_value(key, &mut |v| v == value),
            Self::Equals { key, value } => actual.contains(key) && actual.any_value(key, &mut |v| v == value),
        }
    }
}

impl FromStr for PredicateRule {
    type Err = RuleParseError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err(RuleParseError::Empty);
        }

        let invalid = |reason| RuleParseError::InvalidPredicate { rule: rule.to_string(), reason };

        if let Some((key, value)) = rule.split_once("!=") {
            let key = key.trim();
            if key.is_empty() || key.starts_with('!') {
                return Err(invalid("missing key before '!='"));
            }
            return Ok(Self::NotEquals { key: key.to_string(), value: value.trim().to_string() });
        }

        if let Some((key, value)) = rule.split_once('=') {
            let key = key.trim();
            if key.is_empty() || key.starts_with('!') {
                return Err(invalid("missing key before '='"));
            }
            return Ok(Self::Equals { key: key.to_string(), value: value.trim().to_string() });
        }

        if let Some(key) = rule.strip_prefix('!') {
            let key = key.trim();
            if key.is_empty() {
                return Err(invalid("missing key after '!'"));
            }
            return Ok(Self::Absent { key: key.to_string() });
        }

        Ok(Self::Present { key: rule.to_string() })
    }
}

impl Display for PredicateRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equals { key, value } => write!(f, "{key}={value}"),
            Self::NotEquals { key, value } => write!(f, "{key}!={value}"),
            Self::Present { key } => f.write_str(key),
            Self::Absent { key } => write!(f, "!{key}"),
        }
    }
}
