//! Request metadata as a host delivers it.

use std::net::SocketAddr;

use tandem_core::{HeaderMap, Method, RequestHead};

/// Method, target, headers and peer of one request, before any body byte
/// is read.
///
/// Headers arrive already split into name/value pairs; they are validated
/// when the request head is built.
#[derive(Debug, Clone)]
pub struct Scope {
    pub method: String,
    pub scheme: String,
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query_string: String,
    pub headers: Vec<(String, String)>,
    pub client: Option<SocketAddr>,
}

impl Scope {
    /// A plain `http` scope with no headers.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            scheme: "http".to_owned(),
            path: path.into(),
            query_string: String::new(),
            headers: Vec::new(),
            client: None,
        }
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn with_query_string(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = query_string.into();
        self
    }

    /// Append one header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: SocketAddr) -> Self {
        self.client = Some(client);
        self
    }

    /// Header value, compared case-insensitively.
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Build the request head. Fails on header names or values that cannot
    /// be represented.
    pub(crate) fn to_head(&self) -> tandem_core::Result<RequestHead> {
        let headers = HeaderMap::from_pairs(self.headers.iter().cloned())?;
        let mut head = RequestHead::new(Method::parse(&self.method), self.path.clone())
            .with_scheme(self.scheme.clone())
            .with_query_string(self.query_string.clone())
            .with_headers(headers);
        if let Some(client) = self.client {
            head = head.with_client(client);
        }
        Ok(head)
    }

    /// A head that is always buildable, used to render error responses for
    /// requests whose own head was rejected.
    pub(crate) fn fallback_head(&self) -> RequestHead {
        RequestHead::new(Method::parse(&self.method), self.path.clone())
    }
}
