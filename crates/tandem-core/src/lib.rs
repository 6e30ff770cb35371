//! Request and response model for tandem.
//!
//! Everything here is independent of how the host drives I/O. The same
//! [`Request`] facade and [`Response`] variants serve a blocking host
//! (bodies are iterators) and a cooperative host (bodies are streams):
//!
//! - [`HeaderMap`], [`QueryMap`] and cookie parsing
//! - [`BodyStream`] / [`AsyncBodyStream`]: one pass over a request body,
//!   bounded by the declared length
//! - [`Request`]: lazy, memoized body views (bytes, JSON, form, multipart)
//!   that are mutually exclusive with taking the raw stream
//! - [`Response`]: bytes, JSON, redirects, streams, server-sent events and
//!   files, rendered for either host
//! - [`range`]: byte ranges and conditional requests for file responses
//! - [`multipart`]: an incremental `multipart/form-data` decoder
//!
//! The gateway adapters that connect this model to a concrete host live in
//! `tandem-gateway`.

#![forbid(unsafe_code)]

mod body;
mod cookie;
pub mod date;
pub mod error;
mod headers;
pub mod multipart;
mod query;
pub mod range;
mod request;
mod response;
pub mod sse;

pub use body::{
    AsyncBodyStream, BodyConfig, BodyStream, ChunkIter, ChunkStream, DEFAULT_MAX_BODY_SIZE,
    DEFAULT_READ_CHUNK_SIZE, DisconnectSignal,
};
pub use cookie::{Cookie, SameSite, parse_cookie_header};
pub use error::{BoxError, Error, Result, StreamReadError};
pub use headers::{ContentType, HeaderMap, HeaderMapBuilder};
pub use multipart::{
    AsyncMultipartPart, AsyncMultipartReader, MultipartConfig, MultipartError, MultipartForm,
    MultipartPart, MultipartReader, PartHead, UploadFile,
};
pub use query::{QueryMap, percent_decode, percent_encode};
pub use range::{ByteRange, FileMeta};
pub use request::{
    AsyncRequest, BlockingRequest, Method, Request, RequestConfig, RequestHead,
};
pub use response::{
    AsyncBody, BlockingBody, BytesResponse, DEFAULT_FILE_CHUNK_SIZE, EventStreamResponse,
    FileResponse, RedirectResponse, Rendered, Response, StreamResponse, canonical_reason,
};
pub use sse::ServerSentEvent;
