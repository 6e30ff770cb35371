//! Query string and urlencoded form parsing.
//!
//! The same [`QueryMap`] shape serves both the request's query string and
//! `application/x-www-form-urlencoded` bodies: keys are case-sensitive,
//! duplicate keys are kept in order, and both keys and values are
//! percent-decoded with `+` read as a space.
//!
//! # Example
//!
//! ```
//! use tandem_core::QueryMap;
//!
//! let query = QueryMap::parse("a=1&b=hello+world&a=3");
//! assert_eq!(query.get("a"), Some("1"));
//! assert_eq!(query.get_all("a").collect::<Vec<_>>(), ["1", "3"]);
//! assert_eq!(query.get("b"), Some("hello world"));
//! ```

use std::borrow::Cow;

/// Decoded, ordered, case-sensitive key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMap {
    pairs: Vec<(String, String)>,
}

impl QueryMap {
    /// Parse a query string (without the leading `?`).
    ///
    /// Keys without a value (`?flag`) map to an empty string; empty
    /// segments (`a=1&&b=2`) are skipped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (
                    percent_decode(key).into_owned(),
                    percent_decode(value).into_owned(),
                )
            })
            .collect();
        Self { pairs }
    }

    /// First value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key` in order.
    pub fn get_all<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether `key` appears at all.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Every pair in order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if there are no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Percent-decode a string, treating `+` as a space.
///
/// Returns `Cow::Borrowed` when nothing needed decoding. Invalid escapes
/// are kept literally and invalid UTF-8 is replaced.
#[must_use]
pub fn percent_decode(s: &str) -> Cow<'_, str> {
    if !s.contains('%') && !s.contains('+') {
        return Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                    out.push((hi << 4) | lo);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

/// Percent-encode everything outside `unreserved` and the bytes in `keep`.
///
/// Used for `Location` targets (which keep URL delimiters) and for RFC
/// 5987 `filename*` values (which keep nothing extra).
#[must_use]
pub fn percent_encode<'a>(s: &'a str, keep: &[u8]) -> Cow<'a, str> {
    let unchanged = |b: u8| b.is_ascii_alphanumeric() || b"-._~".contains(&b) || keep.contains(&b);
    if s.bytes().all(unchanged) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for b in s.bytes() {
        if unchanged(b) {
            out.push(char::from(b));
        } else {
            out.push('%');
            out.push(char::from(HEX[usize::from(b >> 4)]));
            out.push(char::from(HEX[usize::from(b & 0x0f)]));
        }
    }
    Cow::Owned(out)
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
