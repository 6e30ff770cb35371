//! Request body streams.
//!
//! A body is a single-consumption sequence of non-empty byte chunks. Two
//! realizations share one accounting core:
//!
//! - [`BodyStream`] pulls from a blocking source (an iterator of chunks, a
//!   [`Read`] bounded by Content-Length, or a chunked-framed [`Read`]).
//! - [`AsyncBodyStream`] polls a [`futures::Stream`] of chunks and suspends
//!   the task instead of the thread.
//!
//! Both enforce the same contract: empty chunks are skipped, a declared
//! Content-Length is checked in both directions, end-of-stream is terminal
//! and idempotent, and once a read fails every later read fails too.
//!
//! # Body Size Limits
//!
//! `read_all` buffers the whole body but refuses to grow past the bound it
//! is given, failing with [`Error::PayloadTooLarge`] as soon as a chunk
//! would cross it. [`BodyConfig`] carries the default bound (1MB).
//!
//! # Example
//!
//! ```
//! use tandem_core::BodyStream;
//!
//! let mut body = BodyStream::new(vec![Ok(b"hello ".to_vec()), Ok(Vec::new()), Ok(b"world".to_vec())]);
//! assert_eq!(body.read_all(1024).unwrap(), b"hello world");
//! assert_eq!(body.next_chunk().unwrap(), None);
//! ```

use std::fmt;
use std::io::{ErrorKind, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt};

use crate::error::{Error, Result, StreamReadError};

/// Default maximum buffered body size (1MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Default size of a single read from a blocking source (64KB).
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Longest chunk-size line accepted in chunked framing.
const MAX_CHUNK_LINE: usize = 4096;

/// Configuration for body reading.
#[derive(Debug, Clone)]
pub struct BodyConfig {
    /// Maximum body size `read_all` will buffer.
    max_size: usize,
    /// Size of each read from a blocking source.
    chunk_size: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_BODY_SIZE,
            chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl BodyConfig {
    /// Create a new body configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum body size.
    #[must_use]
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the read chunk size. Zero is bumped to one byte.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Returns the maximum body size.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the read chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Shared flag recording that the client went away.
///
/// Gateway adapters trip it when the host reports a disconnect, either
/// while the body is read or while the response is sent.
#[derive(Debug, Clone, Default)]
pub struct DisconnectSignal(Arc<AtomicBool>);

impl DisconnectSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the disconnect.
    pub fn trip(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a disconnect has been recorded.
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ============================================================================
// Shared accounting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FrameState {
    #[default]
    Open,
    Ended,
    Failed,
}

enum Step {
    Chunk(Vec<u8>),
    Skip,
    End,
}

/// Declared-length bookkeeping and terminal-state tracking.
#[derive(Debug, Default)]
struct Framing {
    declared: Option<u64>,
    received: u64,
    state: FrameState,
}

impl Framing {
    /// `Some` once the stream reached a terminal state.
    fn settled(&self) -> Option<Result<Option<Vec<u8>>, StreamReadError>> {
        match self.state {
            FrameState::Open => None,
            FrameState::Ended => Some(Ok(None)),
            FrameState::Failed => Some(Err(StreamReadError::Failed)),
        }
    }

    fn accept(
        &mut self,
        item: Option<Result<Vec<u8>, StreamReadError>>,
    ) -> Result<Step, StreamReadError> {
        match item {
            None => {
                if let Some(declared) = self.declared {
                    if self.received < declared {
                        return self.fail(StreamReadError::Incomplete {
                            received: self.received,
                            declared,
                        });
                    }
                }
                self.state = FrameState::Ended;
                Ok(Step::End)
            }
            Some(Err(e)) => self.fail(e),
            Some(Ok(chunk)) if chunk.is_empty() => Ok(Step::Skip),
            Some(Ok(chunk)) => {
                self.received = self.received.saturating_add(chunk.len() as u64);
                if let Some(declared) = self.declared {
                    if self.received > declared {
                        return self.fail(StreamReadError::LengthExceeded { declared });
                    }
                }
                Ok(Step::Chunk(chunk))
            }
        }
    }

    fn fail(&mut self, e: StreamReadError) -> Result<Step, StreamReadError> {
        self.state = FrameState::Failed;
        Err(e)
    }
}

/// Bounded accumulator behind both `read_all` flavours.
struct Collector {
    buf: Vec<u8>,
    limit: usize,
}

impl Collector {
    fn new(limit: usize, declared: Option<u64>) -> Result<Self> {
        if let Some(declared) = declared {
            if declared > limit as u64 {
                return Err(Error::PayloadTooLarge {
                    limit: limit as u64,
                });
            }
        }
        let capacity = declared.map_or(0, |d| usize::try_from(d).unwrap_or(limit));
        Ok(Self {
            buf: Vec::with_capacity(capacity),
            limit,
        })
    }

    fn push(&mut self, chunk: &[u8]) -> Result<()> {
        if self.buf.len().saturating_add(chunk.len()) > self.limit {
            return Err(Error::PayloadTooLarge {
                limit: self.limit as u64,
            });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }
}

fn io_to_stream_error(e: std::io::Error) -> StreamReadError {
    match e.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => StreamReadError::Disconnected,
        _ => StreamReadError::Io(e),
    }
}

// ============================================================================
// Blocking stream
// ============================================================================

/// Boxed blocking chunk source.
pub type ChunkIter = Box<dyn Iterator<Item = Result<Vec<u8>, StreamReadError>> + Send>;

/// Blocking, single-consumption request body.
pub struct BodyStream {
    source: Option<ChunkIter>,
    framing: Framing,
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

impl BodyStream {
    /// Stream over any iterator of chunk results.
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<Vec<u8>, StreamReadError>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            source: Some(Box::new(chunks.into_iter())),
            framing: Framing::default(),
        }
    }

    /// A body with no bytes.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// A body backed by bytes already in memory.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self::new(std::iter::once(Ok(bytes))).with_declared_length(len)
    }

    /// Read from `reader`, stopping after `content_length` bytes when given
    /// and otherwise at EOF. A short read is reported as
    /// [`StreamReadError::Incomplete`].
    pub fn from_reader<R>(reader: R, content_length: Option<u64>, chunk_size: usize) -> Self
    where
        R: Read + Send + 'static,
    {
        let stream = Self::new(ReaderChunks {
            reader,
            remaining: content_length,
            chunk_size: chunk_size.max(1),
            done: false,
        });
        match content_length {
            Some(len) => stream.with_declared_length(len),
            None => stream,
        }
    }

    /// Decode `Transfer-Encoding: chunked` framing from a raw reader.
    pub fn chunked<R>(reader: R, chunk_size: usize) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::new(ChunkedChunks {
            reader,
            buf: Vec::new(),
            state: ChunkedState::Size,
            chunk_size: chunk_size.max(1),
            eof: false,
        })
    }

    /// Enforce a declared Content-Length on this stream.
    #[must_use]
    pub fn with_declared_length(mut self, len: u64) -> Self {
        self.framing.declared = Some(len);
        self
    }

    /// Declared Content-Length, if any.
    #[must_use]
    pub fn declared_length(&self) -> Option<u64> {
        self.framing.declared
    }

    /// Returns true once end-of-stream or a failure has been reached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.framing.state != FrameState::Open
    }

    /// Pull the next non-empty chunk, blocking the calling thread.
    ///
    /// `Ok(None)` is end-of-stream and is returned again on every later
    /// call.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamReadError> {
        loop {
            if let Some(settled) = self.framing.settled() {
                return settled;
            }
            let item = self.source.as_mut().and_then(Iterator::next);
            match self.framing.accept(item) {
                Ok(Step::Chunk(chunk)) => return Ok(Some(chunk)),
                Ok(Step::Skip) => {}
                Ok(Step::End) => {
                    self.source = None;
                    return Ok(None);
                }
                Err(e) => {
                    self.source = None;
                    return Err(e);
                }
            }
        }
    }

    /// Buffer the rest of the body, failing once it would exceed
    /// `max_bytes`.
    pub fn read_all(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut collector = Collector::new(max_bytes, self.framing.declared)?;
        while let Some(chunk) = self.next_chunk()? {
            collector.push(&chunk)?;
        }
        Ok(collector.buf)
    }
}

/// Iterating yields each chunk; after the first error iteration stops.
impl Iterator for BodyStream {
    type Item = Result<Vec<u8>, StreamReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.framing.state == FrameState::Failed {
            return None;
        }
        self.next_chunk().transpose()
    }
}

struct ReaderChunks<R> {
    reader: R,
    remaining: Option<u64>,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> Iterator for ReaderChunks<R> {
    type Item = Result<Vec<u8>, StreamReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let want = match self.remaining {
            Some(0) => {
                self.done = true;
                return None;
            }
            Some(n) => usize::try_from(n).map_or(self.chunk_size, |n| n.min(self.chunk_size)),
            None => self.chunk_size,
        };
        let mut buf = vec![0; want];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => {
                    buf.truncate(n);
                    if let Some(remaining) = &mut self.remaining {
                        *remaining -= n as u64;
                    }
                    return Some(Ok(buf));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(io_to_stream_error(e)));
                }
            }
        }
    }
}

// ============================================================================
// Chunked transfer decoding
// ============================================================================

/// State machine for chunked encoding parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Expecting chunk size line.
    Size,
    /// Reading chunk data.
    Data { remaining: u64 },
    /// Expecting CRLF after chunk data.
    DataEnd,
    /// Skipping trailers after the final chunk.
    Trailers,
    Complete,
}

struct ChunkedChunks<R> {
    reader: R,
    buf: Vec<u8>,
    state: ChunkedState,
    chunk_size: usize,
    eof: bool,
}

impl<R: Read> ChunkedChunks<R> {
    /// Decode from buffered bytes. `Ok(None)` means more input is needed,
    /// or decoding is complete.
    fn step(&mut self) -> Result<Option<Vec<u8>>, StreamReadError> {
        loop {
            match self.state {
                ChunkedState::Size => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        if self.buf.len() > MAX_CHUNK_LINE {
                            return Err(StreamReadError::InvalidChunked {
                                detail: "chunk size line too long",
                            });
                        }
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&self.buf[..line_end])?;
                    self.buf.drain(..line_end + 2);
                    self.state = if size == 0 {
                        ChunkedState::Trailers
                    } else {
                        ChunkedState::Data { remaining: size }
                    };
                }
                ChunkedState::Data { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let take = usize::try_from(remaining)
                        .map_or(self.buf.len(), |r| r.min(self.buf.len()));
                    let data: Vec<u8> = self.buf.drain(..take).collect();
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        ChunkedState::DataEnd
                    } else {
                        ChunkedState::Data { remaining: left }
                    };
                    return Ok(Some(data));
                }
                ChunkedState::DataEnd => {
                    if self.buf.len() < 2 {
                        return Ok(None);
                    }
                    if &self.buf[..2] != b"\r\n" {
                        return Err(StreamReadError::InvalidChunked {
                            detail: "expected CRLF after chunk data",
                        });
                    }
                    self.buf.drain(..2);
                    self.state = ChunkedState::Size;
                }
                ChunkedState::Trailers => {
                    let Some(line_end) = find_crlf(&self.buf) else {
                        return Ok(None);
                    };
                    self.buf.drain(..line_end + 2);
                    if line_end == 0 {
                        self.state = ChunkedState::Complete;
                    }
                }
                ChunkedState::Complete => return Ok(None),
            }
        }
    }

    fn fill(&mut self) -> Result<(), StreamReadError> {
        if self.eof {
            return Err(StreamReadError::InvalidChunked {
                detail: "unexpected end of chunked body",
            });
        }
        let mut tmp = vec![0; self.chunk_size];
        loop {
            match self.reader.read(&mut tmp) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&tmp[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(io_to_stream_error(e)),
            }
        }
    }
}

impl<R: Read> Iterator for ChunkedChunks<R> {
    type Item = Result<Vec<u8>, StreamReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let outcome = match self.step() {
                Ok(Some(chunk)) => return Some(Ok(chunk)),
                Ok(None) if self.state == ChunkedState::Complete => return None,
                Ok(None) => self.fill(),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.state = ChunkedState::Complete;
                return Some(Err(e));
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, StreamReadError> {
    let size = line
        .iter()
        .position(|&b| b == b';')
        .map_or(line, |semi| &line[..semi]);
    let size = std::str::from_utf8(size).map_err(|_| StreamReadError::InvalidChunked {
        detail: "invalid UTF-8 in chunk size",
    })?;
    u64::from_str_radix(size.trim(), 16).map_err(|_| StreamReadError::InvalidChunked {
        detail: "invalid hex chunk size",
    })
}

// ============================================================================
// Cooperative stream
// ============================================================================

/// Boxed cooperative chunk source.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, StreamReadError>> + Send>>;

/// Cooperative, single-consumption request body.
pub struct AsyncBodyStream {
    source: Option<ChunkStream>,
    framing: Framing,
}

impl fmt::Debug for AsyncBodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBodyStream")
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

impl AsyncBodyStream {
    /// Stream over any `Stream` of chunk results.
    pub fn new<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, StreamReadError>> + Send + 'static,
    {
        Self {
            source: Some(chunks.boxed()),
            framing: Framing::default(),
        }
    }

    /// A body with no bytes.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }

    /// A body backed by bytes already in memory.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self::new(futures::stream::iter([Ok(bytes)])).with_declared_length(len)
    }

    /// Enforce a declared Content-Length on this stream.
    #[must_use]
    pub fn with_declared_length(mut self, len: u64) -> Self {
        self.framing.declared = Some(len);
        self
    }

    /// Declared Content-Length, if any.
    #[must_use]
    pub fn declared_length(&self) -> Option<u64> {
        self.framing.declared
    }

    /// Returns true once end-of-stream or a failure has been reached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.framing.state != FrameState::Open
    }

    /// Poll for the next non-empty chunk.
    pub fn poll_chunk(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<Vec<u8>>, StreamReadError>> {
        loop {
            if let Some(settled) = self.framing.settled() {
                return Poll::Ready(settled);
            }
            let item = match self.source.as_mut() {
                Some(source) => futures::ready!(source.poll_next_unpin(cx)),
                None => None,
            };
            match self.framing.accept(item) {
                Ok(Step::Chunk(chunk)) => return Poll::Ready(Ok(Some(chunk))),
                Ok(Step::Skip) => {}
                Ok(Step::End) => {
                    self.source = None;
                    return Poll::Ready(Ok(None));
                }
                Err(e) => {
                    self.source = None;
                    return Poll::Ready(Err(e));
                }
            }
        }
    }

    /// Await the next non-empty chunk.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamReadError> {
        futures::future::poll_fn(|cx| self.poll_chunk(cx)).await
    }

    /// Buffer the rest of the body, failing once it would exceed
    /// `max_bytes`.
    pub async fn read_all(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut collector = Collector::new(max_bytes, self.framing.declared)?;
        while let Some(chunk) = self.next_chunk().await? {
            collector.push(&chunk)?;
        }
        Ok(collector.buf)
    }
}

/// Streaming yields each chunk; after the first error the stream ends.
impl Stream for AsyncBodyStream {
    type Item = Result<Vec<u8>, StreamReadError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.framing.state == FrameState::Failed {
            return Poll::Ready(None);
        }
        this.poll_chunk(cx).map(Result::transpose)
    }
}
