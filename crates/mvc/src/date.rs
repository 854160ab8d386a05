//! HTTP date handling for conditional requests and cookies.
//!
//! Both directions are plain functions over [`httpdate`], there is no shared formatter state.

use http::HeaderValue;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parses an IMF-fixdate (or the obsolete RFC 850 / asctime forms), `None` if malformed.
pub fn parse_http_date(value: &HeaderValue) -> Option<SystemTime> {
    value.to_str().ok().and_then(|text| httpdate::parse_http_date(text.trim()).ok())
}

pub fn fmt_http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

/// Formats `time` as a header value, truncated to whole seconds.
pub fn http_date_value(time: SystemTime) -> HeaderValue {
    HeaderValue::try_from(fmt_http_date(time)).unwrap_or_else(|_| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"))
}

/// Drops the sub-second part, HTTP dates only carry seconds.
pub fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => UNIX_EPOCH + Duration::from_secs(elapsed.as_secs()),
        Err(_) => time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format() {
        let value = HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT");
        let time = parse_http_date(&value).unwrap();
        assert_eq!(time, UNIX_EPOCH + Duration::from_secs(784111777));
        assert_eq!(fmt_http_date(time), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn malformed_date_is_none() {
        assert_eq!(parse_http_date(&HeaderValue::from_static("yesterday")), None);
    }

    #[test]
    fn truncation() {
        let time = UNIX_EPOCH + Duration::from_millis(1_500);
        assert_eq!(truncate_to_seconds(time), UNIX_EPOCH + Duration::from_secs(1));
        assert_eq!(http_date_value(time), "Thu, 01 Jan 1970 00:00:01 GMT");
    }
}
