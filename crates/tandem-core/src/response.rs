//! Response variants and their rendering.
//!
//! A [`Response`] is one of a closed set of variants. Each carries a status,
//! a [`HeaderMapBuilder`], and a payload. Rendering consumes the response
//! and produces a [`Rendered`] value: final status, frozen headers with
//! `content-type` and (where the length is known) `content-length` filled
//! in, and a chunk sequence in the caller's convention:
//!
//! - [`Response::render_blocking`] → an iterator ([`BlockingBody`])
//! - [`Response::render_async`] → a stream ([`AsyncBody`])
//!
//! Either kind of source renders under either convention. A blocking
//! iterator rendered for the cooperative side is driven on tokio's
//! blocking pool when a tokio runtime is current, and on a dedicated
//! thread otherwise. Keep-alive timers and file reads pick tokio the same
//! way, so any executor can poll an [`AsyncBody`]. A cooperative stream
//! rendered for the blocking side is polled to completion on the calling
//! thread.
//!
//! HEAD requests get the same status and headers with an empty body; the
//! payload is dropped without being pulled.
//!
//! # Example
//!
//! ```
//! use tandem_core::{Method, RequestHead, Response};
//!
//! let response = Response::text("hello").with_status(201);
//! let rendered = response.render_blocking(&RequestHead::new(Method::Get, "/")).unwrap();
//! assert_eq!(rendered.status, 201);
//! assert_eq!(rendered.headers.get("content-length"), Some("5"));
//! assert_eq!(rendered.collect().unwrap(), b"hello");
//! ```

use std::fmt;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use futures::channel::mpsc::{UnboundedReceiver, unbounded};
use futures::future::{Either, select};
use futures::stream::{Stream, StreamExt};
use futures::{SinkExt, TryStreamExt};
use serde::Serialize;

use crate::cookie::Cookie;
use crate::error::{BoxError, Error, Result};
use crate::headers::{HeaderMap, HeaderMapBuilder};
use crate::query::percent_encode;
use crate::range::{self, FileMeta, Segment, SegmentReader};
use crate::request::{Method, RequestHead};
use crate::sse::{self, ServerSentEvent};

/// Default size of a single file read (64KB).
pub const DEFAULT_FILE_CHUNK_SIZE: usize = 64 * 1024;

/// URL delimiters kept verbatim in a `Location` header.
const LOCATION_SAFE: &[u8] = b":/?#[]@!$&'()*+,;=%";

/// Body chunks for a blocking host.
pub type BlockingBody = Box<dyn Iterator<Item = io::Result<Vec<u8>>> + Send>;

/// Body chunks for a cooperative host.
pub type AsyncBody = Pin<Box<dyn Stream<Item = io::Result<Vec<u8>>> + Send>>;

type EventIter = Box<dyn Iterator<Item = ServerSentEvent> + Send>;
type EventStream = Pin<Box<dyn Stream<Item = ServerSentEvent> + Send>>;

/// Reason phrase for well-known status codes.
#[must_use]
pub fn canonical_reason(status: u16) -> Option<&'static str> {
    let reason = match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Content Too Large",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        422 => "Unprocessable Content",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => return None,
    };
    Some(reason)
}

/// Append `; charset=utf-8` to textual media types that lack one.
fn with_charset(media_type: &str) -> String {
    if media_type.starts_with("text/") && !media_type.contains("charset") {
        format!("{media_type}; charset=utf-8")
    } else {
        media_type.to_owned()
    }
}

/// Status plus headers shared by every variant.
#[derive(Debug, Clone)]
struct ResponseHead {
    status: u16,
    headers: HeaderMapBuilder,
}

impl ResponseHead {
    fn new(status: u16, content_type: Option<&str>) -> Self {
        let mut headers = HeaderMapBuilder::new();
        if let Some(content_type) = content_type {
            headers.insert("content-type", with_charset(content_type));
        }
        Self { status, headers }
    }
}

// ============================================================================
// Sources
// ============================================================================

enum ChunkSource {
    Blocking(BlockingBody),
    Async(AsyncBody),
}

impl ChunkSource {
    fn into_blocking(self) -> BlockingBody {
        match self {
            Self::Blocking(iter) => iter,
            Self::Async(stream) => Box::new(futures::executor::block_on_stream(stream)),
        }
    }

    fn into_async(self) -> io::Result<AsyncBody> {
        match self {
            Self::Async(stream) => Ok(stream),
            Self::Blocking(iter) => offload(iter),
        }
    }
}

enum EventSource {
    Blocking(EventIter),
    Async(EventStream),
}

impl EventSource {
    fn into_blocking(self) -> EventIter {
        match self {
            Self::Blocking(iter) => iter,
            Self::Async(stream) => Box::new(futures::executor::block_on_stream(stream)),
        }
    }

    fn into_async(self) -> io::Result<EventStream> {
        match self {
            Self::Async(stream) => Ok(stream),
            Self::Blocking(iter) => offload(iter),
        }
    }
}

fn tokio_runtime_current() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

/// Run `work` on tokio's blocking pool when a runtime is current, else on
/// a thread of its own.
fn spawn_blocking_work(name: &str, work: impl FnOnce() + Send + 'static) -> io::Result<()> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            drop(handle.spawn_blocking(work));
            Ok(())
        }
        Err(_) => std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(work)
            .map(drop),
    }
}

/// Drive a blocking iterator off the polling task, one item in flight.
/// Dropping the returned stream makes the producer stop at its next send.
fn offload<T: Send + 'static>(
    iter: Box<dyn Iterator<Item = T> + Send>,
) -> io::Result<Pin<Box<dyn Stream<Item = T> + Send>>> {
    let (mut tx, rx) = futures::channel::mpsc::channel(0);
    spawn_blocking_work("tandem-offload", move || {
        for item in iter {
            if futures::executor::block_on(tx.send(item)).is_err() {
                tracing::debug!("stream receiver dropped, stopping producer");
                break;
            }
        }
    })?;
    Ok(Box::pin(rx))
}

/// Keep-alive for the blocking side: a producer thread feeds a rendezvous
/// channel and the consumer emits a ping whenever it waits too long.
struct PingingEvents {
    rx: mpsc::Receiver<Vec<u8>>,
    interval: Duration,
}

impl Iterator for PingingEvents {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv_timeout(self.interval) {
            Ok(chunk) => Some(Ok(chunk)),
            Err(RecvTimeoutError::Timeout) => Some(Ok(sse::PING.to_vec())),
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

fn events_blocking(source: EventSource, ping: Option<Duration>) -> Result<BlockingBody> {
    let events = source.into_blocking();
    let Some(interval) = ping else {
        return Ok(Box::new(events.map(|event| Ok::<_, io::Error>(event.encode()))));
    };
    let (tx, rx) = mpsc::sync_channel(0);
    std::thread::Builder::new()
        .name("tandem-sse".to_owned())
        .spawn(move || {
            for event in events {
                if tx.send(event.encode()).is_err() {
                    break;
                }
            }
        })?;
    Ok(Box::new(PingingEvents { rx, interval }))
}

/// One tick per `interval` until the receiver is dropped.
fn ticker(interval: Duration) -> io::Result<UnboundedReceiver<()>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("tandem-sse-ticker".to_owned())
        .spawn(move || {
            loop {
                std::thread::sleep(interval);
                if tx.unbounded_send(()).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Keep-alive without a tokio timer: a ping goes out on any tick that
/// follows a full tick period without events.
struct IdleWatch {
    events: AsyncBody,
    ticks: UnboundedReceiver<()>,
    active: bool,
}

fn events_async(source: EventSource, ping: Option<Duration>) -> io::Result<AsyncBody> {
    let encoded: AsyncBody = Box::pin(
        source
            .into_async()?
            .map(|event| Ok::<_, io::Error>(event.encode())),
    );
    let Some(interval) = ping else {
        return Ok(encoded);
    };
    if tokio_runtime_current() {
        return Ok(Box::pin(futures::stream::unfold(
            encoded,
            move |mut stream| async move {
                match tokio::time::timeout(interval, stream.next()).await {
                    Ok(Some(chunk)) => Some((chunk, stream)),
                    Ok(None) => None,
                    Err(_) => Some((Ok(sse::PING.to_vec()), stream)),
                }
            },
        )));
    }
    let watch = IdleWatch {
        events: encoded,
        ticks: ticker(interval)?,
        active: false,
    };
    Ok(Box::pin(futures::stream::unfold(
        watch,
        |mut watch| async move {
            loop {
                let event = match select(watch.events.next(), watch.ticks.next()).await {
                    Either::Left((event, _)) => Some(event),
                    Either::Right((Some(()), _)) => None,
                    Either::Right((None, pending)) => Some(pending.await),
                };
                match event {
                    Some(Some(chunk)) => {
                        watch.active = true;
                        return Some((chunk, watch));
                    }
                    Some(None) => return None,
                    None if std::mem::take(&mut watch.active) => {}
                    None => return Some((Ok(sse::PING.to_vec()), watch)),
                }
            }
        },
    )))
}

// ============================================================================
// Variants
// ============================================================================

/// Fully buffered bytes (also used for text, HTML and JSON).
#[derive(Debug, Clone)]
pub struct BytesResponse {
    head: ResponseHead,
    body: Vec<u8>,
}

/// A `Location` redirect.
#[derive(Debug, Clone)]
pub struct RedirectResponse {
    head: ResponseHead,
}

/// A lazy, finite, non-restartable chunk sequence.
pub struct StreamResponse {
    head: ResponseHead,
    source: ChunkSource,
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

/// A `text/event-stream` response.
pub struct EventStreamResponse {
    head: ResponseHead,
    source: EventSource,
    ping_interval: Option<Duration>,
}

impl fmt::Debug for EventStreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamResponse")
            .field("head", &self.head)
            .field("ping_interval", &self.ping_interval)
            .finish_non_exhaustive()
    }
}

impl EventStreamResponse {
    fn with_source(source: EventSource) -> Self {
        let mut head = ResponseHead::new(200, Some("text/event-stream"));
        head.headers.insert("cache-control", "no-cache");
        Self {
            head,
            source,
            ping_interval: Some(sse::DEFAULT_PING_INTERVAL),
        }
    }

    /// Events from a blocking iterator.
    pub fn new<I>(events: I) -> Self
    where
        I: IntoIterator<Item = ServerSentEvent>,
        I::IntoIter: Send + 'static,
    {
        Self::with_source(EventSource::Blocking(Box::new(events.into_iter())))
    }

    /// Events from a cooperative stream.
    pub fn new_async<S>(events: S) -> Self
    where
        S: Stream<Item = ServerSentEvent> + Send + 'static,
    {
        Self::with_source(EventSource::Async(events.boxed()))
    }

    /// Keep-alive interval; `None` disables pings.
    #[must_use]
    pub fn ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }
}

/// A file on disk, served with range and conditional-request support.
#[derive(Debug, Clone)]
pub struct FileResponse {
    head: ResponseHead,
    path: PathBuf,
    meta: FileMeta,
    media_type: String,
    download_name: Option<String>,
    chunk_size: usize,
}

impl FileResponse {
    /// Stat `path` now. A missing path or a directory fails with an I/O
    /// `NotFound` error.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(Error::Io(io::Error::new(
                ErrorKind::NotFound,
                format!("{} is not a regular file", path.display()),
            )));
        }
        let media_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_owned();
        Ok(Self {
            head: ResponseHead::new(200, None),
            meta: FileMeta::from_metadata(&metadata),
            path,
            media_type: with_charset(&media_type),
            download_name: None,
            chunk_size: DEFAULT_FILE_CHUNK_SIZE,
        })
    }

    /// Offer the file as a download named `name`.
    #[must_use]
    pub fn download_name(mut self, name: impl Into<String>) -> Self {
        self.download_name = Some(name.into());
        self
    }

    /// Override the guessed media type.
    #[must_use]
    pub fn media_type(mut self, media_type: &str) -> Self {
        self.media_type = with_charset(media_type);
        self
    }

    /// Size of each read.
    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    fn content_disposition(&self) -> Option<String> {
        let name = self.download_name.as_deref()?;
        let quoted = name.replace('\\', "\\\\").replace('"', "\\\"");
        Some(format!(
            "attachment; filename=\"{quoted}\"; filename*=utf-8''{}",
            percent_encode(name, b"")
        ))
    }
}

/// The closed set of response kinds.
#[derive(Debug)]
pub enum Response {
    Bytes(BytesResponse),
    Json(BytesResponse),
    Redirect(RedirectResponse),
    Stream(StreamResponse),
    Events(EventStreamResponse),
    File(FileResponse),
}

impl From<StreamResponse> for Response {
    fn from(response: StreamResponse) -> Self {
        Self::Stream(response)
    }
}

impl From<EventStreamResponse> for Response {
    fn from(response: EventStreamResponse) -> Self {
        Self::Events(response)
    }
}

impl From<FileResponse> for Response {
    fn from(response: FileResponse) -> Self {
        Self::File(response)
    }
}

impl Response {
    fn buffered(media_type: &str, body: Vec<u8>) -> Self {
        Self::Bytes(BytesResponse {
            head: ResponseHead::new(200, Some(media_type)),
            body,
        })
    }

    /// Raw bytes as `application/octet-stream`.
    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self::buffered("application/octet-stream", body.into())
    }

    /// `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::buffered("text/plain", body.into().into_bytes())
    }

    /// `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::buffered("text/html", body.into().into_bytes())
    }

    /// Serialize `value` now.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(Error::JsonEncode)?;
        Ok(Self::Json(BytesResponse {
            head: ResponseHead::new(200, Some("application/json")),
            body,
        }))
    }

    /// Redirect to `url` with 307; use [`Response::with_status`] for
    /// another code.
    pub fn redirect(url: &str) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(Error::InvalidRedirect("target is empty"));
        }
        let mut head = ResponseHead::new(307, None);
        head.headers
            .insert("location", percent_encode(url, LOCATION_SAFE).into_owned());
        Ok(Self::Redirect(RedirectResponse { head }))
    }

    /// Stream chunks from a blocking iterator.
    pub fn stream<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Into<Vec<u8>> + 'static,
    {
        let iter = chunks
            .into_iter()
            .map(|chunk| Ok::<_, io::Error>(Into::<Vec<u8>>::into(chunk)));
        Self::with_chunks(ChunkSource::Blocking(Box::new(iter)))
    }

    /// Stream chunks from a fallible blocking iterator. An error after the
    /// headers went out aborts the response.
    pub fn try_stream<I, T, E>(chunks: I) -> Self
    where
        I: IntoIterator<Item = std::result::Result<T, E>>,
        I::IntoIter: Send + 'static,
        T: Into<Vec<u8>> + 'static,
        E: Into<BoxError> + 'static,
    {
        let iter = chunks.into_iter().map(|chunk| {
            chunk
                .map(Into::<Vec<u8>>::into)
                .map_err(io::Error::other)
        });
        Self::with_chunks(ChunkSource::Blocking(Box::new(iter)))
    }

    /// Stream chunks from a cooperative stream.
    pub fn stream_async<S, T>(chunks: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Into<Vec<u8>> + 'static,
    {
        let stream = chunks.map(|chunk| Ok::<_, io::Error>(Into::<Vec<u8>>::into(chunk)));
        Self::with_chunks(ChunkSource::Async(stream.boxed()))
    }

    /// Stream chunks from a fallible cooperative stream.
    pub fn try_stream_async<S, T, E>(chunks: S) -> Self
    where
        S: Stream<Item = std::result::Result<T, E>> + Send + 'static,
        T: Into<Vec<u8>> + 'static,
        E: Into<BoxError> + 'static,
    {
        let stream = chunks
            .map_ok(Into::<Vec<u8>>::into)
            .map_err(io::Error::other);
        Self::with_chunks(ChunkSource::Async(stream.boxed()))
    }

    fn with_chunks(source: ChunkSource) -> Self {
        Self::Stream(StreamResponse {
            head: ResponseHead::new(200, Some("application/octet-stream")),
            source,
        })
    }

    /// Server-sent events from a blocking iterator, pinging every
    /// [`sse::DEFAULT_PING_INTERVAL`].
    pub fn events<I>(events: I) -> Self
    where
        I: IntoIterator<Item = ServerSentEvent>,
        I::IntoIter: Send + 'static,
    {
        EventStreamResponse::new(events).into()
    }

    /// Server-sent events from a cooperative stream.
    pub fn events_async<S>(events: S) -> Self
    where
        S: Stream<Item = ServerSentEvent> + Send + 'static,
    {
        EventStreamResponse::new_async(events).into()
    }

    /// Serve the file at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Result<Self> {
        FileResponse::new(path).map(Self::File)
    }

    fn head(&self) -> &ResponseHead {
        match self {
            Self::Bytes(r) | Self::Json(r) => &r.head,
            Self::Redirect(r) => &r.head,
            Self::Stream(r) => &r.head,
            Self::Events(r) => &r.head,
            Self::File(r) => &r.head,
        }
    }

    fn head_mut(&mut self) -> &mut ResponseHead {
        match self {
            Self::Bytes(r) | Self::Json(r) => &mut r.head,
            Self::Redirect(r) => &mut r.head,
            Self::Stream(r) => &mut r.head,
            Self::Events(r) => &mut r.head,
            Self::File(r) => &mut r.head,
        }
    }

    /// Status the response will be sent with. File responses may still
    /// change it to 206, 304, 412 or 416 when rendered.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.head().status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMapBuilder {
        &self.head().headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMapBuilder {
        &mut self.head_mut().headers
    }

    /// Any code is accepted, standard or not.
    pub fn set_status(&mut self, status: u16) {
        self.head_mut().status = status;
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.set_status(status);
        self
    }

    /// Replace `name` with `value`.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers_mut().insert(name, value);
        self
    }

    /// Append a `Set-Cookie` header.
    pub fn set_cookie(&mut self, cookie: &Cookie) {
        self.headers_mut()
            .append("set-cookie", cookie.to_header_value());
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: &Cookie) -> Self {
        self.set_cookie(cookie);
        self
    }

    /// Tell the client to drop cookie `name` on path `/`.
    pub fn delete_cookie(&mut self, name: &str) {
        self.set_cookie(&Cookie::removal(name));
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    fn prepare(self, request: &RequestHead) -> Result<Prepared> {
        let (head, payload, content_length) = match self {
            Self::Bytes(r) | Self::Json(r) => {
                let len = r.body.len() as u64;
                (r.head, Payload::Full(r.body), Some(len))
            }
            Self::Redirect(r) => (r.head, Payload::Empty, Some(0)),
            Self::Stream(r) => (r.head, Payload::Chunks(r.source), None),
            Self::Events(r) => (
                r.head,
                Payload::Events {
                    source: r.source,
                    ping: r.ping_interval,
                },
                None,
            ),
            Self::File(r) => return prepare_file(r, request),
        };
        let mut headers = head.headers;
        if let Some(len) = content_length {
            headers.insert("content-length", len.to_string());
        }
        Ok(Prepared {
            status: head.status,
            headers: headers.build()?,
            payload: strip_for_head(request, payload),
        })
    }

    /// Render for a blocking host.
    pub fn render_blocking(self, request: &RequestHead) -> Result<Rendered<BlockingBody>> {
        let Prepared {
            status,
            headers,
            payload,
        } = self.prepare(request)?;
        let body: BlockingBody = match payload {
            Payload::Empty => Box::new(std::iter::empty::<io::Result<Vec<u8>>>()),
            Payload::Full(bytes) => Box::new(std::iter::once(Ok::<_, io::Error>(bytes))),
            Payload::Chunks(source) => source.into_blocking(),
            Payload::Events { source, ping } => events_blocking(source, ping)?,
            Payload::File {
                path,
                segments,
                chunk_size,
            } => {
                let file = std::fs::File::open(&path)?;
                Box::new(SegmentReader::new(file, segments, chunk_size))
            }
        };
        Ok(Rendered {
            status,
            headers,
            body,
        })
    }

    /// Render for a cooperative host. Under a tokio runtime file opens,
    /// seeks and reads are each awaited; elsewhere they run on a thread of
    /// their own.
    pub async fn render_async(self, request: &RequestHead) -> Result<Rendered<AsyncBody>> {
        let Prepared {
            status,
            headers,
            payload,
        } = self.prepare(request)?;
        let body: AsyncBody = match payload {
            Payload::Empty => Box::pin(futures::stream::empty::<io::Result<Vec<u8>>>()),
            Payload::Full(bytes) => Box::pin(futures::stream::iter([Ok::<_, io::Error>(bytes)])),
            Payload::Chunks(source) => source.into_async()?,
            Payload::Events { source, ping } => events_async(source, ping)?,
            Payload::File {
                path,
                segments,
                chunk_size,
            } => {
                if tokio_runtime_current() {
                    let file = tokio::fs::File::open(&path).await?;
                    Box::pin(range::read_segments_async(file, segments, chunk_size))
                } else {
                    let file = std::fs::File::open(&path)?;
                    offload(Box::new(SegmentReader::new(file, segments, chunk_size)))?
                }
            }
        };
        Ok(Rendered {
            status,
            headers,
            body,
        })
    }
}

enum Payload {
    Empty,
    Full(Vec<u8>),
    Chunks(ChunkSource),
    Events {
        source: EventSource,
        ping: Option<Duration>,
    },
    File {
        path: PathBuf,
        segments: Vec<Segment>,
        chunk_size: usize,
    },
}

struct Prepared {
    status: u16,
    headers: HeaderMap,
    payload: Payload,
}

fn strip_for_head(request: &RequestHead, payload: Payload) -> Payload {
    match (request.method(), payload) {
        (Method::Head, _) => Payload::Empty,
        (_, Payload::Full(bytes)) if bytes.is_empty() => Payload::Empty,
        (_, payload) => payload,
    }
}

fn prepare_file(response: FileResponse, request: &RequestHead) -> Result<Prepared> {
    let plan = range::plan_file(
        request.method(),
        request.headers(),
        &response.meta,
        &response.media_type,
    );
    let content_length = plan.content_length();
    let reads_file = plan.reads_file();
    let disposition = response.content_disposition();
    let mut headers = response.head.headers;
    if let Some(disposition) = disposition {
        headers.insert("content-disposition", disposition);
    }
    for (name, value) in plan.headers {
        headers.insert(name, value);
    }
    headers.insert("content-length", content_length.to_string());

    let payload = if reads_file {
        Payload::File {
            path: response.path,
            segments: plan.segments,
            chunk_size: response.chunk_size,
        }
    } else {
        Payload::Empty
    };
    Ok(Prepared {
        status: plan.status,
        headers: headers.build()?,
        payload: strip_for_head(request, payload),
    })
}

/// A rendered response ready to hand to a host.
pub struct Rendered<B> {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: B,
}

impl<B> fmt::Debug for Rendered<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendered")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl Rendered<BlockingBody> {
    /// Drain the body into one buffer.
    pub fn collect(self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        for chunk in self.body {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Rendered<AsyncBody> {
    /// Drain the body into one buffer.
    pub async fn collect(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}
