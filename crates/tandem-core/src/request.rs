//! Request facade.
//!
//! A [`Request`] pairs the metadata a host already parsed ([`RequestHead`])
//! with a single-consumption body. Metadata is cheap; the query string and
//! cookies are parsed on first access. Body views are lazy too:
//!
//! | View | Needs | Memoized |
//! |------|-------|----------|
//! | `body_bytes` | anything | buffer kept |
//! | `body_json` | `application/json`, `application/*+json` | yes |
//! | `body_form` | `application/x-www-form-urlencoded` | yes |
//! | `body_multipart` | `multipart/form-data` | no, streaming |
//! | `body_multipart_form` | `multipart/form-data` | yes |
//! | `body_stream` | anything | no |
//!
//! Once `body_stream` hands the live stream out (or a streaming multipart
//! reader takes it), every view that has not been memoized yet fails with
//! [`Error::BodyAlreadyConsumed`]. That check comes before any media type
//! check. After a buffered view, `body_stream` returns a fresh stream over
//! the buffer instead.
//!
//! The same method names exist on [`BlockingRequest`] and
//! [`AsyncRequest`]; on the latter they are `async`.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::body::{AsyncBodyStream, BodyConfig, BodyStream, DisconnectSignal};
use crate::cookie::parse_cookie_header;
use crate::error::{Error, Result};
use crate::headers::{ContentType, HeaderMap};
use crate::multipart::{
    AsyncMultipartReader, MultipartConfig, MultipartForm, MultipartReader, parse_boundary,
};
use crate::query::QueryMap;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Trace,
    Connect,
    /// Any extension method, kept verbatim.
    Other(String),
}

impl Method {
    /// Parse a method token. Methods are case-sensitive.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            "CONNECT" => Self::Connect,
            other => Self::Other(other.to_owned()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
            Self::Other(token) => token,
        }
    }

    /// GET or HEAD, the methods conditional 304s and ranges apply to.
    #[must_use]
    pub fn is_get_or_head(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits applied while reading a request body.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    body: BodyConfig,
    multipart: MultipartConfig,
}

impl RequestConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_body(mut self, body: BodyConfig) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_multipart(mut self, multipart: MultipartConfig) -> Self {
        self.multipart = multipart;
        self
    }

    #[must_use]
    pub fn body(&self) -> &BodyConfig {
        &self.body
    }

    #[must_use]
    pub fn multipart(&self) -> &MultipartConfig {
        &self.multipart
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Everything about a request except its body.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    scheme: String,
    path: String,
    query_string: String,
    headers: HeaderMap,
    client: Option<SocketAddr>,
    query: OnceLock<QueryMap>,
    cookies: OnceLock<HashMap<String, String>>,
}

impl RequestHead {
    /// A plain-`http` request with no headers or query string.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            scheme: "http".to_owned(),
            path: path.into(),
            query_string: String::new(),
            headers: HeaderMap::new(),
            client: None,
            query: OnceLock::new(),
            cookies: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Raw query string, without the leading `?`.
    #[must_use]
    pub fn with_query_string(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = query_string.into();
        self.query = OnceLock::new();
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self.cookies = OnceLock::new();
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: SocketAddr) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Peer address, when the host knows it.
    #[must_use]
    pub fn client(&self) -> Option<SocketAddr> {
        self.client
    }

    /// Decoded query parameters, parsed on first access.
    pub fn query(&self) -> &QueryMap {
        self.query.get_or_init(|| QueryMap::parse(&self.query_string))
    }

    /// Request cookies, parsed on first access from every `Cookie` header.
    pub fn cookies(&self) -> &HashMap<String, String> {
        self.cookies.get_or_init(|| {
            let joined = self.headers.get_all("cookie").collect::<Vec<_>>().join("; ");
            parse_cookie_header(&joined)
        })
    }

    /// `scheme://host/path?query`, with the host from the `Host` header.
    #[must_use]
    pub fn url(&self) -> String {
        let host = self.headers.get("host").unwrap_or("localhost");
        let mut url = format!("{}://{host}{}", self.scheme, self.path);
        if !self.query_string.is_empty() {
            url.push('?');
            url.push_str(&self.query_string);
        }
        url
    }

    /// Whether the `Accept` header admits `media_type`. Wildcards are
    /// honored and `q=0` entries exclude; no header accepts everything.
    #[must_use]
    pub fn accepts(&self, media_type: &str) -> bool {
        let mut values = self.headers.get_all("accept").peekable();
        if values.peek().is_none() {
            return true;
        }
        let wanted = media_type.to_ascii_lowercase();
        let (kind, _) = wanted.split_once('/').unwrap_or((wanted.as_str(), ""));
        values.flat_map(|v| v.split(',')).any(|item| {
            let range = ContentType::parse(item);
            let refused = range
                .param("q")
                .and_then(|q| q.trim().parse::<f32>().ok())
                .is_some_and(|q| q <= 0.0);
            if refused {
                return false;
            }
            match range.essence().split_once('/') {
                Some(("*", "*")) => true,
                Some((k, "*")) => k == kind,
                _ => range.essence() == wanted,
            }
        })
    }

    fn content_type(&self) -> Option<ContentType> {
        self.headers.content_type()
    }

    /// Fail unless the declared content type satisfies `accept`.
    fn require_media(&self, expected: &'static str, accept: impl Fn(&ContentType) -> bool) -> Result<()> {
        match self.content_type() {
            Some(content_type) if accept(&content_type) => Ok(()),
            _ => Err(Error::UnsupportedMediaType {
                expected,
                actual: self.headers.get("content-type").map(str::to_owned),
            }),
        }
    }

    fn require_json(&self) -> Result<()> {
        self.require_media("application/json", ContentType::is_json)
    }

    fn require_form(&self) -> Result<()> {
        self.require_media("application/x-www-form-urlencoded", |ct| {
            ct.essence() == "application/x-www-form-urlencoded"
        })
    }

    fn multipart_boundary(&self) -> Result<String> {
        self.require_media("multipart/form-data", |ct| {
            ct.essence() == "multipart/form-data"
        })?;
        let content_type = self.content_type().unwrap_or_else(|| ContentType::parse(""));
        Ok(parse_boundary(&content_type)?)
    }
}

// ============================================================================
// Request
// ============================================================================

enum BodyCell<B> {
    Unread(B),
    Buffered(Vec<u8>),
    Consumed,
}

impl<B> fmt::Debug for BodyCell<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unread(_) => f.write_str("Unread"),
            Self::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Self::Consumed => f.write_str("Consumed"),
        }
    }
}

#[derive(Debug, Default)]
struct Decoded {
    json: Option<Value>,
    form: Option<QueryMap>,
    multipart: Option<MultipartForm>,
}

/// A request plus its body source `B`.
#[derive(Debug)]
pub struct Request<B> {
    head: RequestHead,
    body: BodyCell<B>,
    decoded: Decoded,
    config: RequestConfig,
    disconnect: DisconnectSignal,
}

/// Request read by blocking the calling thread.
pub type BlockingRequest = Request<BodyStream>;

/// Request read by suspending the current task.
pub type AsyncRequest = Request<AsyncBodyStream>;

impl<B> Request<B> {
    #[must_use]
    pub fn new(head: RequestHead, body: B) -> Self {
        Self {
            head,
            body: BodyCell::Unread(body),
            decoded: Decoded::default(),
            config: RequestConfig::default(),
            disconnect: DisconnectSignal::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RequestConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a disconnect flag with the host adapter.
    #[must_use]
    pub fn with_disconnect(mut self, signal: DisconnectSignal) -> Self {
        self.disconnect = signal;
        self
    }

    #[must_use]
    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        self.head.method()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.head.path()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn query(&self) -> &QueryMap {
        self.head.query()
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        self.head.cookies()
    }

    #[must_use]
    pub fn client(&self) -> Option<SocketAddr> {
        self.head.client()
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.head.url()
    }

    #[must_use]
    pub fn accepts(&self, media_type: &str) -> bool {
        self.head.accepts(media_type)
    }

    #[must_use]
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Whether the host reported that the client went away.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnect.is_tripped()
    }

    /// True once the live body stream has been handed out.
    #[must_use]
    pub fn is_body_consumed(&self) -> bool {
        matches!(self.body, BodyCell::Consumed)
    }

    fn ensure_unconsumed(&self) -> Result<()> {
        if self.is_body_consumed() {
            return Err(Error::BodyAlreadyConsumed);
        }
        Ok(())
    }

    /// Take the live stream out, leaving the cell consumed.
    fn take_unread(&mut self) -> Option<B> {
        match std::mem::replace(&mut self.body, BodyCell::Consumed) {
            BodyCell::Unread(stream) => Some(stream),
            other => {
                self.body = other;
                None
            }
        }
    }

    fn buffered(&self) -> Result<&[u8]> {
        match &self.body {
            BodyCell::Buffered(bytes) => Ok(bytes),
            BodyCell::Unread(_) | BodyCell::Consumed => Err(Error::BodyAlreadyConsumed),
        }
    }

    /// Hand out the live stream, or build one over the buffered copy.
    fn stream_with(&mut self, from_bytes: impl FnOnce(Vec<u8>) -> B) -> Result<B> {
        match std::mem::replace(&mut self.body, BodyCell::Consumed) {
            BodyCell::Unread(stream) => Ok(stream),
            BodyCell::Buffered(bytes) => {
                let stream = from_bytes(bytes.clone());
                self.body = BodyCell::Buffered(bytes);
                Ok(stream)
            }
            BodyCell::Consumed => Err(Error::BodyAlreadyConsumed),
        }
    }

    /// Deserialize the JSON body into `T`.
    fn json_as<T: DeserializeOwned>(value: &Value) -> Result<T> {
        Ok(T::deserialize(value)?)
    }
}

impl Request<BodyStream> {
    /// The whole body, buffered up to [`BodyConfig::max_size`].
    pub fn body_bytes(&mut self) -> Result<&[u8]> {
        if let Some(mut stream) = self.take_unread() {
            let bytes = stream.read_all(self.config.body.max_size())?;
            self.body = BodyCell::Buffered(bytes);
        }
        self.buffered()
    }

    /// The body parsed as JSON, decoded once.
    pub fn body_json(&mut self) -> Result<&Value> {
        let value = match self.decoded.json.take() {
            Some(value) => value,
            None => {
                self.ensure_unconsumed()?;
                self.head.require_json()?;
                serde_json::from_slice(self.body_bytes()?)?
            }
        };
        Ok(self.decoded.json.insert(value))
    }

    /// The JSON body deserialized into `T`.
    pub fn body_json_as<T: DeserializeOwned>(&mut self) -> Result<T> {
        Self::json_as(self.body_json()?)
    }

    /// The body parsed as an urlencoded form, decoded once.
    pub fn body_form(&mut self) -> Result<&QueryMap> {
        let form = match self.decoded.form.take() {
            Some(form) => form,
            None => {
                self.ensure_unconsumed()?;
                self.head.require_form()?;
                QueryMap::parse(&String::from_utf8_lossy(self.body_bytes()?))
            }
        };
        Ok(self.decoded.form.insert(form))
    }

    /// Streaming multipart reader over the body.
    pub fn body_multipart(&mut self) -> Result<MultipartReader> {
        self.ensure_unconsumed()?;
        let boundary = self.head.multipart_boundary()?;
        let stream = self.body_stream()?;
        Ok(MultipartReader::new(
            stream,
            &boundary,
            self.config.multipart.clone(),
        ))
    }

    /// The whole multipart body with files spooled past the threshold,
    /// decoded once.
    pub fn body_multipart_form(&mut self) -> Result<&MultipartForm> {
        let form = match self.decoded.multipart.take() {
            Some(form) => form,
            None => MultipartForm::collect(&mut self.body_multipart()?)?,
        };
        Ok(self.decoded.multipart.insert(form))
    }

    /// The body as a chunk stream.
    pub fn body_stream(&mut self) -> Result<BodyStream> {
        self.stream_with(BodyStream::from_bytes)
    }
}

impl Request<AsyncBodyStream> {
    /// The whole body, buffered up to [`BodyConfig::max_size`].
    pub async fn body_bytes(&mut self) -> Result<&[u8]> {
        if let Some(mut stream) = self.take_unread() {
            let bytes = stream.read_all(self.config.body.max_size()).await?;
            self.body = BodyCell::Buffered(bytes);
        }
        self.buffered()
    }

    /// The body parsed as JSON, decoded once.
    pub async fn body_json(&mut self) -> Result<&Value> {
        let value = match self.decoded.json.take() {
            Some(value) => value,
            None => {
                self.ensure_unconsumed()?;
                self.head.require_json()?;
                serde_json::from_slice(self.body_bytes().await?)?
            }
        };
        Ok(self.decoded.json.insert(value))
    }

    pub async fn body_json_as<T: DeserializeOwned>(&mut self) -> Result<T> {
        Self::json_as(self.body_json().await?)
    }

    pub async fn body_form(&mut self) -> Result<&QueryMap> {
        let form = match self.decoded.form.take() {
            Some(form) => form,
            None => {
                self.ensure_unconsumed()?;
                self.head.require_form()?;
                QueryMap::parse(&String::from_utf8_lossy(self.body_bytes().await?))
            }
        };
        Ok(self.decoded.form.insert(form))
    }

    pub fn body_multipart(&mut self) -> Result<AsyncMultipartReader> {
        self.ensure_unconsumed()?;
        let boundary = self.head.multipart_boundary()?;
        let stream = self.body_stream()?;
        Ok(AsyncMultipartReader::new(
            stream,
            &boundary,
            self.config.multipart.clone(),
        ))
    }

    pub async fn body_multipart_form(&mut self) -> Result<&MultipartForm> {
        let form = match self.decoded.multipart.take() {
            Some(form) => form,
            None => MultipartForm::collect_async(&mut self.body_multipart()?).await?,
        };
        Ok(self.decoded.multipart.insert(form))
    }

    pub fn body_stream(&mut self) -> Result<AsyncBodyStream> {
        self.stream_with(AsyncBodyStream::from_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamReadError;
    use futures_executor::block_on;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn head(content_type: Option<&str>) -> RequestHead {
        let headers = match content_type {
            Some(ct) => HeaderMap::from_pairs([("Content-Type", ct)]).unwrap(),
            None => HeaderMap::new(),
        };
        RequestHead::new(Method::Post, "/items").with_headers(headers)
    }

    fn blocking(content_type: Option<&str>, body: &[u8]) -> BlockingRequest {
        Request::new(head(content_type), BodyStream::from_bytes(body.to_vec()))
    }

    /// Body that counts how often its source is pulled.
    fn counted(body: &[u8]) -> (BodyStream, Arc<AtomicUsize>) {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulls);
        let chunks = vec![Ok::<_, StreamReadError>(body.to_vec())];
        let stream = BodyStream::new(chunks.into_iter().inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (stream, pulls)
    }

    // ========================================================================
    // Metadata Tests
    // ========================================================================

    #[test]
    fn method_round_trip() {
        assert_eq!(Method::parse("GET"), Method::Get);
        assert_eq!(Method::parse("get"), Method::Other("get".into()));
        assert_eq!(Method::parse("PURGE").as_str(), "PURGE");
        assert!(Method::Head.is_get_or_head());
        assert!(!Method::Post.is_get_or_head());
    }

    #[test]
    fn url_uses_host_header() {
        let headers = HeaderMap::from_pairs([("Host", "example.org:123")]).unwrap();
        let head = RequestHead::new(Method::Get, "/123")
            .with_scheme("https")
            .with_query_string("a=abc")
            .with_headers(headers);
        assert_eq!(head.url(), "https://example.org:123/123?a=abc");
        assert_eq!(
            RequestHead::new(Method::Get, "/").url(),
            "http://localhost/"
        );
    }

    #[test]
    fn query_and_cookies_parsed_lazily() {
        let headers = HeaderMap::from_pairs([("Cookie", "a=1; b=2"), ("cookie", "c=3")]).unwrap();
        let head = RequestHead::new(Method::Get, "/")
            .with_query_string("x=1&x=2")
            .with_headers(headers);
        assert_eq!(head.query().get_all("x").collect::<Vec<_>>(), ["1", "2"]);
        assert_eq!(head.cookies().get("b").map(String::as_str), Some("2"));
        assert_eq!(head.cookies().get("c").map(String::as_str), Some("3"));
    }

    #[test]
    fn accept_negotiation() {
        let with = |accept: &str| {
            RequestHead::new(Method::Get, "/")
                .with_headers(HeaderMap::from_pairs([("Accept", accept)]).unwrap())
        };
        assert!(RequestHead::new(Method::Get, "/").accepts("application/json"));
        assert!(with("application/json").accepts("application/json"));
        assert!(with("text/html, */*;q=0.8").accepts("application/json"));
        assert!(with("application/*").accepts("Application/JSON"));
        assert!(!with("text/html").accepts("application/json"));
        assert!(!with("application/json;q=0").accepts("application/json"));
    }

    // ========================================================================
    // Body View Tests
    // ========================================================================

    #[test]
    fn json_scenario() {
        let mut req = blocking(Some("application/json"), br#"{"a":1}"#);
        assert_eq!(req.body_json().unwrap(), &serde_json::json!({"a": 1}));
    }

    #[test]
    fn json_is_parsed_once() {
        let (stream, pulls) = counted(br#"{"a":[1,2]}"#);
        let mut req = Request::new(head(Some("application/json")), stream);
        let first: *const Value = req.body_json().unwrap();
        let second: *const Value = req.body_json().unwrap();
        assert_eq!(first, second);
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn json_as_typed() {
        #[derive(serde::Deserialize)]
        struct Item {
            a: u32,
        }
        let mut req = blocking(Some("application/vnd.api+json"), br#"{"a":7}"#);
        assert_eq!(req.body_json_as::<Item>().unwrap().a, 7);
    }

    #[test]
    fn json_media_type_checks() {
        let mut req = blocking(Some("application/x-www-form-urlencoded"), b"a=1");
        assert!(matches!(
            req.body_json(),
            Err(Error::UnsupportedMediaType { expected: "application/json", .. })
        ));
        let mut req = blocking(None, b"{}");
        assert!(matches!(
            req.body_json(),
            Err(Error::UnsupportedMediaType { actual: None, .. })
        ));
        let mut req = blocking(Some("application/json"), b"{not json");
        assert!(matches!(req.body_json(), Err(Error::JsonDecode(_))));
    }

    #[test]
    fn stream_then_any_view_is_consumed() {
        for content_type in [
            Some("application/json"),
            Some("text/plain"),
            Some("multipart/form-data; boundary=x"),
            None,
        ] {
            let mut req = blocking(content_type, b"{}");
            let _stream = req.body_stream().unwrap();
            assert!(matches!(req.body_json(), Err(Error::BodyAlreadyConsumed)));
            assert!(matches!(req.body_bytes(), Err(Error::BodyAlreadyConsumed)));
            assert!(matches!(req.body_form(), Err(Error::BodyAlreadyConsumed)));
            assert!(matches!(req.body_multipart(), Err(Error::BodyAlreadyConsumed)));
            assert!(matches!(req.body_stream(), Err(Error::BodyAlreadyConsumed)));
        }
    }

    #[test]
    fn bytes_then_stream_replays_buffer() {
        let mut req = blocking(Some("text/plain"), b"abc");
        assert_eq!(req.body_bytes().unwrap(), b"abc");
        let mut stream = req.body_stream().unwrap();
        assert_eq!(stream.read_all(16).unwrap(), b"abc");
        assert_eq!(req.body_bytes().unwrap(), b"abc");
        assert!(!req.is_body_consumed());
    }

    #[test]
    fn body_limit_applies() {
        let mut req = blocking(Some("text/plain"), &[b'x'; 64])
            .with_config(RequestConfig::new().with_body(BodyConfig::new().with_max_size(16)));
        assert!(matches!(
            req.body_bytes(),
            Err(Error::PayloadTooLarge { limit: 16 })
        ));
    }

    #[test]
    fn form_view() {
        let mut req = blocking(Some("application/x-www-form-urlencoded"), b"abc=123+%40&x=1");
        assert_eq!(req.body_form().unwrap().get("abc"), Some("123 @"));
        let mut req = blocking(Some("application/json"), b"abc=1");
        assert!(matches!(
            req.body_form(),
            Err(Error::UnsupportedMediaType { .. })
        ));
    }

    #[test]
    fn multipart_views() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"file-key\"; filename=\"t.txt\"\r\n\r\n\
            temporary file\r\n--b--\r\n";
        let mut req = blocking(Some("multipart/form-data; boundary=b"), body);
        let form = req.body_multipart_form().unwrap();
        let file = form.get_file("file-key").unwrap();
        assert_eq!(file.bytes().unwrap(), b"temporary file");
        // Memoized even though the stream is gone.
        assert_eq!(req.body_multipart_form().unwrap().len(), 1);
        assert!(matches!(req.body_bytes(), Err(Error::BodyAlreadyConsumed)));
    }

    #[test]
    fn multipart_boundary_errors() {
        let mut req = blocking(Some("multipart/form-data"), b"");
        assert!(matches!(req.body_multipart(), Err(Error::MalformedBody(_))));
        let mut req = blocking(Some("text/plain"), b"");
        assert!(matches!(
            req.body_multipart(),
            Err(Error::UnsupportedMediaType { .. })
        ));
        // A failed media check leaves the body readable.
        assert_eq!(req.body_bytes().unwrap(), b"");
    }

    #[test]
    fn disconnect_flag_shared() {
        let signal = DisconnectSignal::new();
        let req = blocking(None, b"").with_disconnect(signal.clone());
        assert!(!req.is_disconnected());
        signal.trip();
        assert!(req.is_disconnected());
    }

    // ========================================================================
    // Cooperative Tests
    // ========================================================================

    #[test]
    fn async_views_match_blocking() {
        block_on(async {
            let mut req: AsyncRequest = Request::new(
                head(Some("application/json")),
                AsyncBodyStream::from_bytes(br#"{"a":1}"#.to_vec()),
            );
            assert_eq!(req.body_json().await.unwrap()["a"], 1);
            assert_eq!(req.body_bytes().await.unwrap(), br#"{"a":1}"#);

            let mut req: AsyncRequest = Request::new(
                head(Some("application/json")),
                AsyncBodyStream::from_bytes(b"{}".to_vec()),
            );
            let _stream = req.body_stream().unwrap();
            assert!(matches!(
                req.body_json().await,
                Err(Error::BodyAlreadyConsumed)
            ));
        });
    }
}
