//! Error taxonomy shared by every request and response operation.
//!
//! [`Error`] is what application code sees from the request facade and
//! from response rendering. Each kind maps onto an HTTP status via
//! [`Error::status_code`], which is how the gateway adapters turn a
//! failure that happens before headers are flushed into a response.
//!
//! [`StreamReadError`] is narrower: it is what a body stream reports
//! when the transport misbehaves. It is never folded into end-of-stream.

use thiserror::Error;

/// Boxed error returned by application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias with [`Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A failure while pulling bytes from a request body.
#[derive(Debug, Error)]
pub enum StreamReadError {
    /// The client went away before the body ended.
    #[error("client disconnected while the body was being read")]
    Disconnected,
    /// More bytes arrived than the declared Content-Length.
    #[error("body exceeds declared content-length of {declared} bytes")]
    LengthExceeded {
        /// The declared length.
        declared: u64,
    },
    /// The body ended before the declared Content-Length was reached.
    #[error("body ended after {received} of {declared} declared bytes")]
    Incomplete {
        /// Bytes received before the end.
        received: u64,
        /// The declared length.
        declared: u64,
    },
    /// Chunked transfer framing could not be decoded.
    #[error("invalid chunked encoding: {detail}")]
    InvalidChunked {
        /// What was wrong with the framing.
        detail: &'static str,
    },
    /// The stream already failed; it stays failed.
    #[error("body stream already failed")]
    Failed,
    /// The underlying transport reported an I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every failure the request facade and response renderers surface.
#[derive(Debug, Error)]
pub enum Error {
    /// A header name or value could not be represented.
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    /// The body stream failed.
    #[error("failed to read request body: {0}")]
    StreamRead(#[from] StreamReadError),
    /// The body is larger than the configured bound.
    #[error("payload too large: limit is {limit} bytes")]
    PayloadTooLarge {
        /// The bound that was exceeded.
        limit: u64,
    },
    /// The body stream was handed out, so no other view can be produced.
    #[error("request body was already consumed as a stream")]
    BodyAlreadyConsumed,
    /// The body is not valid JSON.
    #[error("invalid JSON body: {0}")]
    JsonDecode(#[from] serde_json::Error),
    /// A response value could not be serialized as JSON.
    #[error("failed to encode JSON response: {0}")]
    JsonEncode(serde_json::Error),
    /// The declared content type does not fit the requested view.
    #[error("unsupported media type {actual:?}, expected {expected}")]
    UnsupportedMediaType {
        /// What the view accepts.
        expected: &'static str,
        /// What the request declared, if anything.
        actual: Option<String>,
    },
    /// The body does not follow its declared framing.
    #[error("malformed body: {0}")]
    MalformedBody(String),
    /// A redirect target is missing or cannot be encoded.
    #[error("invalid redirect target: {0}")]
    InvalidRedirect(&'static str),
    /// The Range header cannot be parsed.
    #[error("malformed range header: {0}")]
    MalformedRange(String),
    /// A requested range lies outside the resource.
    #[error("range not satisfiable for a resource of {size} bytes")]
    UnsatisfiableRange {
        /// Total size of the resource.
        size: u64,
    },
    /// The client's cached copy is current.
    #[error("not modified")]
    NotModified,
    /// `If-Match` or `If-Unmodified-Since` did not hold.
    #[error("precondition failed")]
    PreconditionFailed,
    /// Filesystem or transport I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Status code a gateway should answer with when this error escapes a
    /// handler before any header was sent.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedHeader(_)
            | Self::JsonDecode(_)
            | Self::MalformedBody(_)
            | Self::MalformedRange(_) => 400,
            Self::PayloadTooLarge { .. } => 413,
            Self::UnsupportedMediaType { .. } => 415,
            Self::UnsatisfiableRange { .. } => 416,
            Self::NotModified => 304,
            Self::PreconditionFailed => 412,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => 404,
            Self::StreamRead(_)
            | Self::BodyAlreadyConsumed
            | Self::JsonEncode(_)
            | Self::InvalidRedirect(_)
            | Self::Io(_) => 500,
        }
    }

    /// Returns true for failures caused by the client going away.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::StreamRead(StreamReadError::Disconnected))
    }
}
