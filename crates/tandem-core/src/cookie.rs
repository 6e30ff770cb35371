//! Cookies: lenient parsing of the request `Cookie` header and
//! serialization of response `Set-Cookie` values.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::date;
use crate::headers::unquote;

/// Parse a `Cookie` header into a name→value mapping.
///
/// Follows what browsers do with `document.cookie` rather than RFC 6265:
/// every `;` splits, a chunk without `=` is stored under the empty name,
/// surrounding whitespace and one level of quotes are stripped, and the
/// last duplicate wins.
#[must_use]
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for chunk in header.split(';') {
        let (key, value) = chunk.split_once('=').unwrap_or(("", chunk));
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() && value.is_empty() {
            continue;
        }
        cookies.insert(key.to_owned(), unquote(value).to_owned());
    }
    cookies
}

/// `SameSite` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// A cookie to send with a response.
///
/// ```
/// use tandem_core::{Cookie, SameSite};
///
/// let cookie = Cookie::new("session", "abc")
///     .max_age(3600)
///     .http_only(true)
///     .same_site(SameSite::Lax);
/// assert_eq!(
///     cookie.to_header_value(),
///     "session=abc; Max-Age=3600; Path=/; HttpOnly; SameSite=Lax"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    max_age: Option<i64>,
    expires: Option<SystemTime>,
    path: Option<String>,
    domain: Option<String>,
    secure: bool,
    http_only: bool,
    same_site: Option<SameSite>,
}

impl Cookie {
    /// A session cookie scoped to `/`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            expires: None,
            path: Some("/".to_owned()),
            domain: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    /// A cookie that tells the client to drop `name` immediately.
    #[must_use]
    pub fn removal(name: impl Into<String>) -> Self {
        Self::new(name, "")
            .max_age(0)
            .expires(SystemTime::UNIX_EPOCH)
    }

    #[must_use]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    /// Restrict the cookie to `path`; `None` omits the attribute.
    #[must_use]
    pub fn path(mut self, path: Option<&str>) -> Self {
        self.path = path.map(str::to_owned);
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
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

    #[must_use]
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize as a `Set-Cookie` header value.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(expires) = self.expires {
            out.push_str(&format!("; Expires={}", date::format_http_date(expires)));
        }
        if let Some(path) = &self.path {
            out.push_str(&format!("; Path={path}"));
        }
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={domain}"));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(header: &str) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = parse_cookie_header(header).into_iter().collect();
        pairs.sort();
        pairs
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut v: Vec<_> = items
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        v.sort();
        v
    }

    #[test]
    fn simple_pairs() {
        assert_eq!(
            parsed("chips=ahoy; vienna=finger"),
            pairs(&[("chips", "ahoy"), ("vienna", "finger")])
        );
    }

    #[test]
    fn last_duplicate_wins() {
        assert_eq!(parsed("a=b; h=i; a=c"), pairs(&[("a", "c"), ("h", "i")]));
    }

    #[test]
    fn value_may_contain_equals() {
        assert_eq!(parsed("keebler=E=mc2"), pairs(&[("keebler", "E=mc2")]));
    }

    #[test]
    fn quoted_value_unquoted() {
        assert_eq!(parsed("token=\"abc\""), pairs(&[("token", "abc")]));
        // Semicolons split even inside quotes.
        assert_eq!(parsed("key=\"a;b\""), pairs(&[("key", "\"a"), ("", "b\"")]));
    }

    #[test]
    fn chunk_without_equals_is_nameless() {
        assert_eq!(parsed("abc"), pairs(&[("", "abc")]));
        assert_eq!(parsed("unnamed; a=b"), pairs(&[("", "unnamed"), ("a", "b")]));
    }

    #[test]
    fn whitespace_and_empty_chunks() {
        assert_eq!(
            parsed("  a  =  b  ;  ;  c  =  "),
            pairs(&[("a", "b"), ("c", "")])
        );
        assert!(parse_cookie_header("").is_empty());
        assert!(parse_cookie_header(" ; ; ").is_empty());
    }

    #[test]
    fn set_cookie_defaults() {
        assert_eq!(Cookie::new("a", "b").to_header_value(), "a=b; Path=/");
    }

    #[test]
    fn set_cookie_all_attributes() {
        let value = Cookie::new("id", "7")
            .max_age(60)
            .expires(SystemTime::UNIX_EPOCH)
            .path(Some("/app"))
            .domain("example.com")
            .secure(true)
            .http_only(true)
            .same_site(SameSite::Strict)
            .to_header_value();
        assert_eq!(
            value,
            "id=7; Max-Age=60; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Path=/app; \
             Domain=example.com; Secure; HttpOnly; SameSite=Strict"
        );
    }

    #[test]
    fn removal_cookie_expires_now() {
        let value = Cookie::removal("session").to_header_value();
        assert!(value.starts_with("session=; Max-Age=0; Expires=Thu, 01 Jan 1970"));
    }
}
