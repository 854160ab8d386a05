//! The request parameter multimap.
//!
//! Parameters come from the URL query string and, for `multipart/form-data`
//! requests, from the text fields of the body. A key may be bound to several
//! values; insertion order is kept.

use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: Vec<(String, String)>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an `application/x-www-form-urlencoded` string, e.g. a URL query.
    ///
    /// Malformed input yields an empty map rather than an error, parameters are advisory.
    pub fn parse_query(query: &str) -> Self {
        match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!(cause = %e, "ignore malformed query string");
                Self::default()
            }
        }
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Returns the first value bound to `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParamMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for ParamMap {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        self.entries.extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_repeated_keys() {
        let params = ParamMap::parse_query("a=1&b=2&a=3&c");
        assert_eq!(params.len(), 4);
        assert_eq!(params.get("a"), Some("1"));
        assert_eq!(params.get_all("a").collect::<Vec<_>>(), vec!["1", "3"]);
        assert_eq!(params.get("c"), Some(""));
        assert!(!params.contains_key("d"));
    }

    #[test]
    fn lookup_outlives_the_key() {
        let params = ParamMap::parse_query("a=1&a=2");
        let value = {
            let key = String::from("a");
            params.get(&key)
        };
        assert_eq!(value, Some("1"));
    }

    #[test]
    fn parse_percent_encoded() {
        let params = ParamMap::parse_query("name=hello%20world&sign=a%2Bb");
        assert_eq!(params.get("name"), Some("hello world"));
        assert_eq!(params.get("sign"), Some("a+b"));
    }

    #[test]
    fn extend_keeps_order() {
        let mut params = ParamMap::parse_query("a=1");
        params.extend([("b", "2"), ("a", "3")]);
        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("a", "1"), ("b", "2"), ("a", "3")]);
    }
}
