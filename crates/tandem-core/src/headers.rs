//! Header model.
//!
//! [`HeaderMap`] is the immutable, ordered multimap every request carries.
//! Lookups are ASCII case-insensitive and always return values in the
//! order they were received, so `get` and `get_all` can never disagree.
//!
//! Responses assemble their headers in a [`HeaderMapBuilder`] and freeze
//! it into a [`HeaderMap`] when rendered; validation happens on the way in
//! for requests and at freeze time for responses.
//!
//! # Example
//!
//! ```
//! use tandem_core::HeaderMap;
//!
//! let headers = HeaderMap::from_pairs([("Accept", "text/html"), ("accept", "*/*")]).unwrap();
//! assert_eq!(headers.get("ACCEPT"), Some("text/html"));
//! assert_eq!(headers.get_all("Accept").collect::<Vec<_>>(), ["text/html", "*/*"]);
//! ```

use crate::error::{Error, Result};

/// Ordered, case-insensitive, multi-valued header collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// An empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already split name/value pairs, validating each one.
    pub fn from_pairs<I, N, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let mut entries = Vec::new();
        for (name, value) in pairs {
            let (name, value) = (name.into(), value.into());
            validate_name(&name)?;
            validate_value(&name, &value)?;
            entries.push((name, value));
        }
        Ok(Self { entries })
    }

    /// Parse a block of `Name: value` lines separated by CRLF or LF.
    ///
    /// Blank lines are skipped; a line without a colon is malformed.
    pub fn parse_lines(raw: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for line in raw.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(Error::MalformedHeader(format!("missing colon in {line:?}")));
            };
            let value = value.trim_matches(|c: char| c == ' ' || c == '\t');
            validate_name(name)?;
            validate_value(name, value)?;
            entries.push((name.to_owned(), value.to_owned()));
        }
        Ok(Self { entries })
    }

    /// First value for `name`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` in the order they were received.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether at least one value exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The full ordered sequence of pairs.
    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of entries, counting repeated names separately.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parsed `Content-Type`, if present.
    #[must_use]
    pub fn content_type(&self) -> Option<ContentType> {
        self.get("content-type").map(ContentType::parse)
    }

    /// Parsed `Content-Length`, if present.
    pub fn content_length(&self) -> Result<Option<u64>> {
        match self.get("content-length") {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::MalformedHeader(format!("invalid content-length {raw:?}"))),
        }
    }

    /// Reopen the map for editing.
    #[must_use]
    pub fn into_builder(self) -> HeaderMapBuilder {
        HeaderMapBuilder {
            entries: self.entries,
        }
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.items())
    }
}

/// Mutable header collection used while a response is being assembled.
#[derive(Debug, Clone, Default)]
pub struct HeaderMapBuilder {
    entries: Vec<(String, String)>,
}

impl HeaderMapBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every value of `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
        self
    }

    /// Add a value without touching existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Set `name` only when no value exists yet.
    pub fn insert_default(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        if !self.contains(name) {
            self.entries.push((name.to_owned(), value.into()));
        }
        self
    }

    /// Remove every value of `name`. Returns true if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    /// First value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether `name` has a value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Validate every pair and freeze into a [`HeaderMap`].
    pub fn build(self) -> Result<HeaderMap> {
        HeaderMap::from_pairs(self.entries)
    }
}

/// A parsed media type with its parameters.
///
/// Parsing is lenient: anything unparseable yields an empty essence
/// rather than an error, which every body view then rejects as an
/// unsupported media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    essence: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    /// Parse a `Content-Type` style value such as
    /// `multipart/form-data; boundary="abc"`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let params = parts
            .filter_map(|p| {
                let (name, value) = p.split_once('=')?;
                Some((
                    name.trim().to_ascii_lowercase(),
                    unquote(value.trim()).to_owned(),
                ))
            })
            .collect();
        Self { essence, params }
    }

    /// `type/subtype` in lowercase, without parameters.
    #[must_use]
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// Parameter value by case-insensitive name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `application/json` or any `application/*+json` type.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.essence == "application/json"
            || (self.essence.starts_with("application/") && self.essence.ends_with("+json"))
    }
}

/// Strip one level of surrounding double quotes.
pub(crate) fn unquote(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::MalformedHeader("empty header name".into()));
    }
    if !name.bytes().all(is_token_byte) {
        return Err(Error::MalformedHeader(format!(
            "invalid character in header name {name:?}"
        )));
    }
    Ok(())
}

fn validate_value(name: &str, value: &str) -> Result<()> {
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0)) {
        return Err(Error::MalformedHeader(format!(
            "control character in value of {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let headers = HeaderMap::from_pairs([("Content-Type", "text/plain")]).unwrap();
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert!(headers.get("content-length").is_none());
    }

    #[test]
    fn repeated_names_keep_order() {
        let headers =
            HeaderMap::from_pairs([("X-A", "1"), ("x-b", "2"), ("x-a", "3"), ("X-A", "4")])
                .unwrap();
        assert_eq!(headers.get_all("x-a").collect::<Vec<_>>(), ["1", "3", "4"]);
        assert_eq!(headers.get("X-a"), Some("1"));
        assert_eq!(headers.len(), 4);
        let names: Vec<_> = headers.items().map(|(n, _)| n).collect();
        assert_eq!(names, ["X-A", "x-b", "x-a", "X-A"]);
    }

    #[test]
    fn parse_lines_basic() {
        let headers =
            HeaderMap::parse_lines("Host: example.com\r\nAccept:  */*\t\r\n\r\n").unwrap();
        assert_eq!(headers.get("host"), Some("example.com"));
        assert_eq!(headers.get("accept"), Some("*/*"));
    }

    #[test]
    fn parse_lines_missing_colon() {
        let err = HeaderMap::parse_lines("Host example.com").unwrap_err();
        assert!(matches!(err, Error::MalformedHeader(_)));
    }

    #[test]
    fn invalid_names_rejected() {
        assert!(HeaderMap::from_pairs([("", "x")]).is_err());
        assert!(HeaderMap::from_pairs([("Bad Name", "x")]).is_err());
        assert!(HeaderMap::from_pairs([("Bad:Name", "x")]).is_err());
    }

    #[test]
    fn injected_newline_rejected() {
        let err = HeaderMap::from_pairs([("X-Evil", "a\r\nSet-Cookie: x=1")]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader(_)));
    }

    #[test]
    fn content_length_parsing() {
        let headers = HeaderMap::from_pairs([("Content-Length", " 42 ")]).unwrap();
        assert_eq!(headers.content_length().unwrap(), Some(42));
        let headers = HeaderMap::from_pairs([("Content-Length", "abc")]).unwrap();
        assert!(headers.content_length().is_err());
        assert_eq!(HeaderMap::new().content_length().unwrap(), None);
    }

    // ========================================================================
    // Builder Tests
    // ========================================================================

    #[test]
    fn builder_insert_replaces() {
        let mut builder = HeaderMapBuilder::new();
        builder.append("X-Tag", "a").append("x-tag", "b");
        builder.insert("X-TAG", "c");
        let headers = builder.build().unwrap();
        assert_eq!(headers.get_all("x-tag").collect::<Vec<_>>(), ["c"]);
    }

    #[test]
    fn builder_insert_default_keeps_existing() {
        let mut builder = HeaderMapBuilder::new();
        builder.insert("content-type", "text/html");
        builder.insert_default("Content-Type", "application/octet-stream");
        builder.insert_default("content-length", "3");
        assert_eq!(builder.get("content-type"), Some("text/html"));
        assert_eq!(builder.get("content-length"), Some("3"));
    }

    #[test]
    fn builder_validates_on_build() {
        let mut builder = HeaderMapBuilder::new();
        builder.insert("X-Ok", "fine").insert("X-Bad", "line\nbreak");
        assert!(builder.build().is_err());
    }

    // ========================================================================
    // ContentType Tests
    // ========================================================================

    #[test]
    fn content_type_params() {
        let ct = ContentType::parse("Multipart/Form-Data; boundary=\"abc 123\"; charset=utf-8");
        assert_eq!(ct.essence(), "multipart/form-data");
        assert_eq!(ct.param("BOUNDARY"), Some("abc 123"));
        assert_eq!(ct.param("charset"), Some("utf-8"));
        assert_eq!(ct.param("missing"), None);
    }

    #[test]
    fn content_type_json_detection() {
        assert!(ContentType::parse("application/json").is_json());
        assert!(ContentType::parse("application/json; charset=utf-8").is_json());
        assert!(ContentType::parse("application/problem+json").is_json());
        assert!(!ContentType::parse("text/json-ish").is_json());
        assert!(!ContentType::parse("").is_json());
    }
}
