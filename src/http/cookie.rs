//! Response cookies and request `Cookie` header parsing.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static COOKIE_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s*=\s*([^;]*)").expect("cookie pattern is valid"));

/// A cookie to send back to the client in a `Set-Cookie` header.
///
/// Attributes are rendered only when set, in the order
/// `Expires`, `Max-Age`, `Domain`, `Path`, `Secure`, `HttpOnly`.
///
/// # Examples
///
/// ```
/// use rmvc::http::Cookie;
///
/// let cookie = Cookie::new("theme", "dark").max_age(3600).http_only(true);
/// assert_eq!(cookie.to_header_value(), "theme=dark; Max-Age=3600; Path=/; HttpOnly");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    expires: Option<DateTime<Utc>>,
    max_age: Option<i64>,
    domain: Option<String>,
    path: String,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    /// Creates a cookie scoped to path `/` with no other attributes.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
            max_age: None,
            domain: None,
            path: "/".to_owned(),
            secure: false,
            http_only: false,
        }
    }

    #[must_use]
    pub fn expires(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }

    /// Number of seconds until the cookie expires.
    #[must_use]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
    }

    /// Serializes the cookie as the value of one `Set-Cookie` header.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(expires) = self.expires {
            out.push_str("; Expires=");
            out.push_str(&expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if !self.path.is_empty() {
            out.push_str("; Path=");
            out.push_str(&self.path);
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// Parses a `Cookie` request header into a name → value map.
///
/// Fragments that are not `name=value` pairs are skipped; a later pair
/// overwrites an earlier one with the same name.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    COOKIE_PAIR
        .captures_iter(header)
        .map(|caps| (caps[1].to_owned(), caps[2].to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn all_attributes_in_fixed_order() {
        let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let cookie = Cookie::new("sid", "abc")
            .http_only(true)
            .secure(true)
            .path("/app")
            .domain("example.com")
            .max_age(60)
            .expires(at);

        assert_eq!(
            cookie.to_header_value(),
            "sid=abc; Expires=Wed, 02 Jan 2030 03:04:05 GMT; Max-Age=60; \
             Domain=example.com; Path=/app; Secure; HttpOnly"
        );
    }

    #[test]
    fn defaults_render_only_path() {
        assert_eq!(Cookie::new("a", "1").to_header_value(), "a=1; Path=/");
    }

    #[test]
    fn parse_header_pairs() {
        let cookies = parse_cookie_header("sid=xyz; theme = dark;lang=fr");
        assert_eq!(cookies["sid"], "xyz");
        assert_eq!(cookies["theme"], "dark");
        assert_eq!(cookies["lang"], "fr");
    }

    #[test]
    fn parse_header_skips_garbage() {
        let cookies = parse_cookie_header("; ;=nothing; ok=1; ???");
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies["ok"], "1");
    }
}
