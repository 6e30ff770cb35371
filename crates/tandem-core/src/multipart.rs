//! Streaming `multipart/form-data` decoding.
//!
//! [`MultipartDecoder`] is a push-style state machine with no I/O of its
//! own: bytes go in through [`MultipartDecoder::feed`] and [`Event`]s come
//! out of [`MultipartDecoder::poll`]. It only ever buffers a bounded
//! lookahead (the part header block, or one delimiter's worth of bytes
//! while scanning part data), so arbitrarily large uploads stream through.
//!
//! Two thin drivers feed it from a request body:
//!
//! - [`MultipartReader`] over a blocking [`BodyStream`]
//! - [`AsyncMultipartReader`] over a cooperative [`AsyncBodyStream`]
//!
//! Each yields parts one at a time. A part borrows its reader mutably, so
//! the reader cannot advance while the part is alive; asking for the next
//! part discards whatever the previous one left unread.
//!
//! [`MultipartForm`] collects a whole body into fields and [`UploadFile`]s,
//! spooling large files to an anonymous temporary file.
//!
//! # Example
//!
//! ```
//! use tandem_core::{BodyStream, MultipartConfig, MultipartReader};
//!
//! let body = b"--XyZ\r\n\
//!     Content-Disposition: form-data; name=\"greeting\"\r\n\r\n\
//!     hello\r\n\
//!     --XyZ--\r\n";
//! let stream = BodyStream::from_bytes(body.to_vec());
//! let mut reader = MultipartReader::new(stream, "XyZ", MultipartConfig::default());
//!
//! let mut part = reader.next_part().unwrap().unwrap();
//! assert_eq!(part.name(), "greeting");
//! assert_eq!(part.text().unwrap(), "hello");
//! assert!(reader.next_part().unwrap().is_none());
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use memchr::memmem::{self, Finder};
use thiserror::Error;

use crate::body::{AsyncBodyStream, BodyStream};
use crate::error::{Error, StreamReadError};
use crate::headers::{ContentType, HeaderMap};

/// Default maximum file size (10MB).
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Default maximum total upload size (50MB).
pub const DEFAULT_MAX_TOTAL_SIZE: usize = 50 * 1024 * 1024;

/// Default maximum number of fields.
pub const DEFAULT_MAX_FIELDS: usize = 100;

/// Default threshold for spooling uploads to a temporary file (1MB).
pub const DEFAULT_SPOOL_THRESHOLD: usize = 1024 * 1024;

/// Default bound on one part's header block (8KB).
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8 * 1024;

/// RFC 2046 caps boundaries at 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;

/// Configuration for multipart parsing.
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Maximum size per file in bytes.
    max_file_size: usize,
    /// Maximum total size of all part bodies in bytes.
    max_total_size: usize,
    /// Maximum number of parts (fields and files).
    max_fields: usize,
    /// Threshold above which collected files are spooled to disk.
    spool_threshold: usize,
    /// Maximum size of one part's header block.
    max_header_size: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            max_fields: DEFAULT_MAX_FIELDS,
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
        }
    }
}

impl MultipartConfig {
    /// Create a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_file_size(mut self, size: usize) -> Self {
        self.max_file_size = size;
        self
    }

    #[must_use]
    pub fn max_total_size(mut self, size: usize) -> Self {
        self.max_total_size = size;
        self
    }

    #[must_use]
    pub fn max_fields(mut self, count: usize) -> Self {
        self.max_fields = count;
        self
    }

    #[must_use]
    pub fn spool_threshold(mut self, size: usize) -> Self {
        self.spool_threshold = size;
        self
    }

    #[must_use]
    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    #[must_use]
    pub fn get_max_file_size(&self) -> usize {
        self.max_file_size
    }

    #[must_use]
    pub fn get_max_total_size(&self) -> usize {
        self.max_total_size
    }

    #[must_use]
    pub fn get_max_fields(&self) -> usize {
        self.max_fields
    }

    #[must_use]
    pub fn get_spool_threshold(&self) -> usize {
        self.spool_threshold
    }

    #[must_use]
    pub fn get_max_header_size(&self) -> usize {
        self.max_header_size
    }
}

/// Errors that can occur during multipart parsing.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("missing boundary in multipart/form-data content type")]
    MissingBoundary,
    #[error("invalid multipart boundary")]
    InvalidBoundary,
    #[error("file too large: {size} bytes exceeds limit of {max}")]
    FileTooLarge { size: usize, max: usize },
    #[error("total upload size too large: {size} bytes exceeds limit of {max}")]
    TotalTooLarge { size: usize, max: usize },
    #[error("too many fields: {count} exceeds limit of {max}")]
    TooManyFields { count: usize, max: usize },
    #[error("missing Content-Disposition header in part")]
    MissingContentDisposition,
    #[error("invalid Content-Disposition: {detail}")]
    InvalidContentDisposition { detail: String },
    #[error("invalid part headers: {detail}")]
    InvalidPartHeaders { detail: String },
    #[error("body ended before the closing boundary")]
    UnexpectedEof,
    #[error("invalid multipart format: {detail}")]
    InvalidFormat { detail: &'static str },
    #[error(transparent)]
    Stream(#[from] StreamReadError),
    #[error("failed to spool upload: {0}")]
    Io(#[from] std::io::Error),
}

impl MultipartError {
    /// Same mapping as the [`Error`] this converts into.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::FileTooLarge { .. } | Self::TotalTooLarge { .. } | Self::TooManyFields { .. } => 413,
            Self::Stream(_) | Self::Io(_) => 500,
            _ => 400,
        }
    }
}

impl From<MultipartError> for Error {
    fn from(e: MultipartError) -> Self {
        match e {
            MultipartError::Stream(e) => Error::StreamRead(e),
            MultipartError::Io(e) => Error::Io(e),
            MultipartError::FileTooLarge { max, .. }
            | MultipartError::TotalTooLarge { max, .. }
            | MultipartError::TooManyFields { max, .. } => Error::PayloadTooLarge { limit: max as u64 },
            other => Error::MalformedBody(other.to_string()),
        }
    }
}

/// Extract and validate the boundary of a `multipart/form-data` type.
pub fn parse_boundary(content_type: &ContentType) -> Result<String, MultipartError> {
    if content_type.essence() != "multipart/form-data" {
        return Err(MultipartError::InvalidBoundary);
    }
    let boundary = content_type
        .param("boundary")
        .ok_or(MultipartError::MissingBoundary)?;
    if boundary.is_empty()
        || boundary.len() > MAX_BOUNDARY_LEN
        || boundary.ends_with(' ')
        || !boundary.bytes().all(is_boundary_byte)
    {
        return Err(MultipartError::InvalidBoundary);
    }
    Ok(boundary.to_owned())
}

/// RFC 2046 `bchars`.
fn is_boundary_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(&b)
}

/// A random 32-character alphanumeric boundary.
#[must_use]
pub fn generate_boundary() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(32)
        .collect()
}

// ============================================================================
// Part metadata
// ============================================================================

/// Name, filename, and raw headers of one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHead {
    name: String,
    filename: Option<String>,
    headers: HeaderMap,
}

impl PartHead {
    /// Form field name from `Content-Disposition`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client-supplied filename, present for file parts.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Every header of the part, in received order.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The part's `Content-Type`, if given.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Returns true if the part carries a filename.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

/// Parse `form-data; name="field"; filename="file.txt"`.
fn parse_content_disposition(value: &str) -> Result<(String, Option<String>), MultipartError> {
    let mut name = None;
    let mut filename = None;

    for param in value.split(';').skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let raw = crate::headers::unquote(raw.trim());
        if key.eq_ignore_ascii_case("name") {
            name = Some(raw.to_owned());
        } else if key.eq_ignore_ascii_case("filename") {
            filename = Some(raw.to_owned());
        }
    }

    let name = name.ok_or_else(|| MultipartError::InvalidContentDisposition {
        detail: "missing name parameter".to_owned(),
    })?;
    Ok((name, filename))
}

// ============================================================================
// Decoder
// ============================================================================

/// Output of one [`MultipartDecoder::poll`].
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    /// Feed more bytes (or signal EOF) before polling again.
    NeedMore,
    /// A part's header block was parsed.
    PartStart(PartHead),
    /// Bytes belonging to the current part, never empty.
    Data(Vec<u8>),
    /// The current part reached its delimiter.
    PartEnd,
    /// The closing delimiter was seen; further input is epilogue.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingBoundary,
    ReadingPartHeaders,
    ReadingPartBody,
    Done,
    Failed,
}

/// Sans-IO multipart state machine.
#[derive(Debug)]
pub struct MultipartDecoder {
    /// `--boundary`, which opens the body.
    dash_boundary: Vec<u8>,
    /// `\r\n--boundary`, which ends every part.
    delimiter: Finder<'static>,
    buf: Vec<u8>,
    state: State,
    /// Whether `buf[0]` begins a line.
    line_start_at_zero: bool,
    config: MultipartConfig,
    parts: usize,
    total_size: usize,
    part_size: usize,
    part_is_file: bool,
}

impl MultipartDecoder {
    /// Create a decoder for `boundary` (without the leading dashes).
    #[must_use]
    pub fn new(boundary: &str, config: MultipartConfig) -> Self {
        let dash_boundary = format!("--{boundary}").into_bytes();
        let delimiter = Finder::new(format!("\r\n--{boundary}").as_bytes()).into_owned();
        Self {
            dash_boundary,
            delimiter,
            buf: Vec::new(),
            state: State::SeekingBoundary,
            line_start_at_zero: true,
            config,
            parts: 0,
            total_size: 0,
            part_size: 0,
            part_is_file: false,
        }
    }

    /// Append input. Bytes after the closing delimiter are dropped.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.state != State::Done {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Returns true once the closing delimiter was seen.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Bytes currently held back for lookahead.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// The limits this decoder enforces.
    #[must_use]
    pub fn config(&self) -> &MultipartConfig {
        &self.config
    }

    /// Advance as far as the buffered input allows. `eof` tells the decoder
    /// no more input will arrive. After an error every later poll fails.
    pub fn poll(&mut self, eof: bool) -> Result<Event, MultipartError> {
        let result = self.advance(eof);
        if result.is_err() {
            self.state = State::Failed;
            self.buf.clear();
        }
        result
    }

    fn advance(&mut self, eof: bool) -> Result<Event, MultipartError> {
        loop {
            match self.state {
                State::SeekingBoundary => {
                    if let Some(event) = self.seek_boundary(eof)? {
                        return Ok(event);
                    }
                }
                State::ReadingPartHeaders => return self.read_headers(eof),
                State::ReadingPartBody => return self.read_body(eof),
                State::Done => return Ok(Event::Done),
                State::Failed => {
                    return Err(MultipartError::InvalidFormat {
                        detail: "decoder already failed",
                    });
                }
            }
        }
    }

    /// Skip the preamble up to the first boundary. `None` means the state
    /// advanced and polling should continue.
    fn seek_boundary(&mut self, eof: bool) -> Result<Option<Event>, MultipartError> {
        let dash_len = self.dash_boundary.len();
        let found = memmem::find_iter(&self.buf, &self.dash_boundary).find_map(|i| {
            let line_start = (i == 0 && self.line_start_at_zero)
                || (i >= 2 && &self.buf[i - 2..i] == b"\r\n");
            if !line_start {
                return None;
            }
            match self.buf.get(i + dash_len..i + dash_len + 2) {
                None => Some((i, None)),
                Some(b"\r\n") => Some((i, Some(false))),
                Some(b"--") => Some((i, Some(true))),
                Some(_) => None,
            }
        });

        match found {
            Some((_, None)) if eof => Err(MultipartError::UnexpectedEof),
            Some((i, None)) => {
                // The candidate stays at index 0 and keeps its line start.
                self.buf.drain(..i);
                self.line_start_at_zero = true;
                Ok(Some(Event::NeedMore))
            }
            Some((_, Some(true))) => {
                self.buf.clear();
                self.state = State::Done;
                Ok(Some(Event::Done))
            }
            Some((i, Some(false))) => {
                self.buf.drain(..i + dash_len + 2);
                self.line_start_at_zero = false;
                self.state = State::ReadingPartHeaders;
                Ok(None)
            }
            None if eof => Err(MultipartError::InvalidFormat {
                detail: "opening boundary not found",
            }),
            None => {
                let keep = dash_len + 2;
                if self.buf.len() > keep {
                    self.buf.drain(..self.buf.len() - keep);
                    self.line_start_at_zero = false;
                }
                Ok(Some(Event::NeedMore))
            }
        }
    }

    fn read_headers(&mut self, eof: bool) -> Result<Event, MultipartError> {
        let block = if self.buf.starts_with(b"\r\n") {
            Some((0, 2))
        } else {
            memmem::find(&self.buf, b"\r\n\r\n").map(|p| (p, p + 4))
        };
        let Some((text_end, consumed)) = block else {
            if self.buf.len() > self.config.max_header_size {
                return Err(MultipartError::InvalidPartHeaders {
                    detail: format!(
                        "header block exceeds {} bytes",
                        self.config.max_header_size
                    ),
                });
            }
            if eof {
                return Err(MultipartError::UnexpectedEof);
            }
            return Ok(Event::NeedMore);
        };
        if text_end > self.config.max_header_size {
            return Err(MultipartError::InvalidPartHeaders {
                detail: format!("header block exceeds {} bytes", self.config.max_header_size),
            });
        }

        let text = std::str::from_utf8(&self.buf[..text_end]).map_err(|_| {
            MultipartError::InvalidPartHeaders {
                detail: "invalid UTF-8 in header".to_owned(),
            }
        })?;
        let headers = HeaderMap::parse_lines(text).map_err(|e| {
            MultipartError::InvalidPartHeaders {
                detail: e.to_string(),
            }
        })?;
        let disposition = headers
            .get("content-disposition")
            .ok_or(MultipartError::MissingContentDisposition)?;
        let (name, filename) = parse_content_disposition(disposition)?;

        self.parts += 1;
        if self.parts > self.config.max_fields {
            return Err(MultipartError::TooManyFields {
                count: self.parts,
                max: self.config.max_fields,
            });
        }

        self.buf.drain(..consumed);
        self.part_size = 0;
        self.part_is_file = filename.is_some();
        self.state = State::ReadingPartBody;
        Ok(Event::PartStart(PartHead {
            name,
            filename,
            headers,
        }))
    }

    fn read_body(&mut self, eof: bool) -> Result<Event, MultipartError> {
        let delimiter_len = self.delimiter.needle().len();
        let mut from = 0;
        while let Some(found) = self.delimiter.find(&self.buf[from..]) {
            let i = from + found;
            let end = i + delimiter_len;
            let Some(suffix) = self.buf.get(end..end + 2) else {
                // Cannot tell yet whether this is the delimiter.
                if i > 0 {
                    return self.emit(i);
                }
                if eof {
                    return Err(MultipartError::UnexpectedEof);
                }
                return Ok(Event::NeedMore);
            };
            let closing = suffix == b"--";
            if closing || suffix == b"\r\n" {
                if i > 0 {
                    return self.emit(i);
                }
                if closing {
                    self.buf.clear();
                    self.state = State::Done;
                } else {
                    self.buf.drain(..end + 2);
                    self.state = State::ReadingPartHeaders;
                }
                return Ok(Event::PartEnd);
            }
            from = i + 1;
        }

        let safe = self.buf.len().saturating_sub(delimiter_len - 1);
        if safe > 0 {
            return self.emit(safe);
        }
        if eof {
            return Err(MultipartError::UnexpectedEof);
        }
        Ok(Event::NeedMore)
    }

    fn emit(&mut self, len: usize) -> Result<Event, MultipartError> {
        let part_size = self.part_size.saturating_add(len);
        if self.part_is_file && part_size > self.config.max_file_size {
            return Err(MultipartError::FileTooLarge {
                size: part_size,
                max: self.config.max_file_size,
            });
        }
        let total_size = self.total_size.saturating_add(len);
        if total_size > self.config.max_total_size {
            return Err(MultipartError::TotalTooLarge {
                size: total_size,
                max: self.config.max_total_size,
            });
        }
        self.part_size = part_size;
        self.total_size = total_size;
        Ok(Event::Data(self.buf.drain(..len).collect()))
    }
}

// ============================================================================
// Blocking reader
// ============================================================================

/// Pulls parts out of a blocking body.
#[derive(Debug)]
pub struct MultipartReader {
    body: BodyStream,
    decoder: MultipartDecoder,
    eof: bool,
    in_part: bool,
}

impl MultipartReader {
    #[must_use]
    pub fn new(body: BodyStream, boundary: &str, config: MultipartConfig) -> Self {
        Self {
            body,
            decoder: MultipartDecoder::new(boundary, config),
            eof: false,
            in_part: false,
        }
    }

    /// The limits in force.
    #[must_use]
    pub fn config(&self) -> &MultipartConfig {
        self.decoder.config()
    }

    fn next_event(&mut self) -> Result<Event, MultipartError> {
        loop {
            match self.decoder.poll(self.eof)? {
                Event::NeedMore => match self.body.next_chunk()? {
                    Some(chunk) => self.decoder.feed(&chunk),
                    None => self.eof = true,
                },
                event => return Ok(event),
            }
        }
    }

    /// The next part, or `None` after the closing delimiter. Unread data of
    /// the previous part is discarded first.
    pub fn next_part(&mut self) -> Result<Option<MultipartPart<'_>>, MultipartError> {
        self.skip_part()?;
        match self.next_event()? {
            Event::PartStart(head) => {
                self.in_part = true;
                Ok(Some(MultipartPart { head, reader: self }))
            }
            Event::Done => Ok(None),
            _ => Err(MultipartError::InvalidFormat {
                detail: "part data outside of a part",
            }),
        }
    }

    fn part_chunk(&mut self) -> Result<Option<Vec<u8>>, MultipartError> {
        if !self.in_part {
            return Ok(None);
        }
        match self.next_event()? {
            Event::Data(data) => Ok(Some(data)),
            Event::PartEnd | Event::Done => {
                self.in_part = false;
                Ok(None)
            }
            Event::PartStart(_) | Event::NeedMore => Err(MultipartError::InvalidFormat {
                detail: "part started before the previous one ended",
            }),
        }
    }

    fn skip_part(&mut self) -> Result<(), MultipartError> {
        while self.part_chunk()?.is_some() {}
        Ok(())
    }
}

/// One part of a blocking multipart body, readable up to its delimiter.
#[derive(Debug)]
pub struct MultipartPart<'r> {
    head: PartHead,
    reader: &'r mut MultipartReader,
}

impl MultipartPart<'_> {
    /// Name, filename and headers.
    #[must_use]
    pub fn head(&self) -> &PartHead {
        &self.head
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.head.name()
    }

    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.head.filename()
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.head.content_type()
    }

    /// Next non-empty chunk of this part; `None` at its delimiter.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, MultipartError> {
        self.reader.part_chunk()
    }

    /// Everything left in this part.
    pub fn read_all(&mut self) -> Result<Vec<u8>, MultipartError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Everything left in this part, as UTF-8 text.
    pub fn text(&mut self) -> Result<String, MultipartError> {
        String::from_utf8(self.read_all()?).map_err(|_| MultipartError::InvalidFormat {
            detail: "field value is not valid UTF-8",
        })
    }

    /// Skip whatever is left in this part.
    pub fn discard(self) -> Result<(), MultipartError> {
        self.reader.skip_part()
    }

    /// Detach the head once the data has been read.
    fn into_head(self) -> PartHead {
        self.head
    }
}

// ============================================================================
// Cooperative reader
// ============================================================================

/// Pulls parts out of a cooperative body; every refill is an await point.
#[derive(Debug)]
pub struct AsyncMultipartReader {
    body: AsyncBodyStream,
    decoder: MultipartDecoder,
    eof: bool,
    in_part: bool,
}

impl AsyncMultipartReader {
    #[must_use]
    pub fn new(body: AsyncBodyStream, boundary: &str, config: MultipartConfig) -> Self {
        Self {
            body,
            decoder: MultipartDecoder::new(boundary, config),
            eof: false,
            in_part: false,
        }
    }

    /// The limits in force.
    #[must_use]
    pub fn config(&self) -> &MultipartConfig {
        self.decoder.config()
    }

    async fn next_event(&mut self) -> Result<Event, MultipartError> {
        loop {
            match self.decoder.poll(self.eof)? {
                Event::NeedMore => match self.body.next_chunk().await? {
                    Some(chunk) => self.decoder.feed(&chunk),
                    None => self.eof = true,
                },
                event => return Ok(event),
            }
        }
    }

    /// The next part, or `None` after the closing delimiter. Unread data of
    /// the previous part is discarded first.
    pub async fn next_part(&mut self) -> Result<Option<AsyncMultipartPart<'_>>, MultipartError> {
        self.skip_part().await?;
        match self.next_event().await? {
            Event::PartStart(head) => {
                self.in_part = true;
                Ok(Some(AsyncMultipartPart { head, reader: self }))
            }
            Event::Done => Ok(None),
            _ => Err(MultipartError::InvalidFormat {
                detail: "part data outside of a part",
            }),
        }
    }

    async fn part_chunk(&mut self) -> Result<Option<Vec<u8>>, MultipartError> {
        if !self.in_part {
            return Ok(None);
        }
        match self.next_event().await? {
            Event::Data(data) => Ok(Some(data)),
            Event::PartEnd | Event::Done => {
                self.in_part = false;
                Ok(None)
            }
            Event::PartStart(_) | Event::NeedMore => Err(MultipartError::InvalidFormat {
                detail: "part started before the previous one ended",
            }),
        }
    }

    async fn skip_part(&mut self) -> Result<(), MultipartError> {
        while self.part_chunk().await?.is_some() {}
        Ok(())
    }
}

/// One part of a cooperative multipart body.
#[derive(Debug)]
pub struct AsyncMultipartPart<'r> {
    head: PartHead,
    reader: &'r mut AsyncMultipartReader,
}

impl AsyncMultipartPart<'_> {
    #[must_use]
    pub fn head(&self) -> &PartHead {
        &self.head
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.head.name()
    }

    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.head.filename()
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.head.content_type()
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, MultipartError> {
        self.reader.part_chunk().await
    }

    pub async fn read_all(&mut self) -> Result<Vec<u8>, MultipartError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    pub async fn text(&mut self) -> Result<String, MultipartError> {
        String::from_utf8(self.read_all().await?).map_err(|_| MultipartError::InvalidFormat {
            detail: "field value is not valid UTF-8",
        })
    }

    pub async fn discard(self) -> Result<(), MultipartError> {
        self.reader.skip_part().await
    }

    fn into_head(self) -> PartHead {
        self.head
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Writes multipart framing compatible with [`MultipartDecoder`].
///
/// Also used for `multipart/byteranges` bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartEncoder {
    boundary: String,
}

impl MultipartEncoder {
    /// Trailer written after each part's data.
    pub const PART_TAIL: &'static [u8] = b"\r\n";

    #[must_use]
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    /// Encoder with a fresh random boundary.
    #[must_use]
    pub fn random() -> Self {
        Self::new(generate_boundary())
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `--boundary\r\n`, the headers, then the blank line.
    #[must_use]
    pub fn part_head<'a, I>(&self, headers: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut out = format!("--{}\r\n", self.boundary);
        for (name, value) in headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }

    /// `--boundary--\r\n`.
    #[must_use]
    pub fn closing(&self) -> Vec<u8> {
        format!("--{}--\r\n", self.boundary).into_bytes()
    }

    /// Encode a full body from (headers, data) parts.
    #[must_use]
    pub fn encode<'a, I>(&self, parts: I) -> Vec<u8>
    where
        I: IntoIterator<Item = (&'a HeaderMap, &'a [u8])>,
    {
        let mut out = Vec::new();
        for (headers, data) in parts {
            out.extend_from_slice(&self.part_head(headers.items()));
            out.extend_from_slice(data);
            out.extend_from_slice(Self::PART_TAIL);
        }
        out.extend_from_slice(&self.closing());
        out
    }
}

// ============================================================================
// Buffered form
// ============================================================================

#[derive(Debug)]
enum UploadStorage {
    InMemory(Vec<u8>),
    Spooled(std::fs::File),
}

/// An uploaded file, in memory or spooled to an anonymous temp file that
/// disappears when the upload is dropped.
#[derive(Debug)]
pub struct UploadFile {
    head: PartHead,
    size: usize,
    storage: UploadStorage,
}

impl UploadFile {
    #[must_use]
    pub fn field_name(&self) -> &str {
        self.head.name()
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        self.head.filename().unwrap_or_default()
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.head.content_type()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true if the contents live on disk.
    #[must_use]
    pub fn is_spooled(&self) -> bool {
        matches!(self.storage, UploadStorage::Spooled(_))
    }

    /// The client filename cut down to its last path component. `None` when
    /// nothing usable is left.
    #[must_use]
    pub fn safe_filename(&self) -> Option<&str> {
        let name = self.head.filename()?;
        let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name);
        let usable = !matches!(base, "" | "." | "..") && !base.contains('\0');
        usable.then_some(base)
    }

    /// File extension from the client filename, lowercase not enforced.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let name = self.head.filename()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty() && !ext.is_empty()).then_some(ext)
    }

    /// Read the whole contents.
    pub fn bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.storage {
            UploadStorage::InMemory(data) => Ok(data.clone()),
            UploadStorage::Spooled(file) => {
                let mut file = file;
                file.seek(SeekFrom::Start(0))?;
                let mut out = Vec::with_capacity(self.size);
                file.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

/// Accumulates one part while a form is collected.
struct PartSink {
    is_file: bool,
    size: usize,
    storage: UploadStorage,
}

impl PartSink {
    fn new(head: &PartHead) -> Self {
        Self {
            is_file: head.is_file(),
            size: 0,
            storage: UploadStorage::InMemory(Vec::new()),
        }
    }

    fn push(&mut self, chunk: &[u8], spool_threshold: usize) -> Result<(), MultipartError> {
        let size = self.size + chunk.len();
        match &mut self.storage {
            UploadStorage::InMemory(data) if self.is_file && size > spool_threshold => {
                let mut file = tempfile::tempfile()?;
                file.write_all(data)?;
                file.write_all(chunk)?;
                self.storage = UploadStorage::Spooled(file);
            }
            UploadStorage::InMemory(data) => data.extend_from_slice(chunk),
            UploadStorage::Spooled(file) => file.write_all(chunk)?,
        }
        self.size = size;
        Ok(())
    }

    fn finish(self, head: PartHead, form: &mut MultipartForm) -> Result<(), MultipartError> {
        if self.is_file {
            form.files.push(UploadFile {
                head,
                size: self.size,
                storage: self.storage,
            });
            return Ok(());
        }
        let UploadStorage::InMemory(data) = self.storage else {
            return Err(MultipartError::InvalidFormat {
                detail: "field value was spooled",
            });
        };
        let value = String::from_utf8(data).map_err(|_| MultipartError::InvalidFormat {
            detail: "field value is not valid UTF-8",
        })?;
        form.fields.push((head.name, value));
        Ok(())
    }
}

/// A fully collected multipart body.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: Vec<(String, String)>,
    files: Vec<UploadFile>,
}

impl MultipartForm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain a blocking reader into a form.
    pub fn collect(reader: &mut MultipartReader) -> Result<Self, MultipartError> {
        let threshold = reader.config().get_spool_threshold();
        let mut form = Self::new();
        while let Some(mut part) = reader.next_part()? {
            let mut sink = PartSink::new(part.head());
            while let Some(chunk) = part.next_chunk()? {
                sink.push(&chunk, threshold)?;
            }
            sink.finish(part.into_head(), &mut form)?;
        }
        Ok(form)
    }

    /// Drain a cooperative reader into a form.
    pub async fn collect_async(reader: &mut AsyncMultipartReader) -> Result<Self, MultipartError> {
        let threshold = reader.config().get_spool_threshold();
        let mut form = Self::new();
        while let Some(mut part) = reader.next_part().await? {
            let mut sink = PartSink::new(part.head());
            while let Some(chunk) = part.next_chunk().await? {
                sink.push(&chunk, threshold)?;
            }
            sink.finish(part.into_head(), &mut form)?;
        }
        Ok(form)
    }

    /// First text field named `name`.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All text fields named `name`.
    pub fn get_fields<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.fields
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// First file uploaded under `name`.
    #[must_use]
    pub fn get_file(&self, name: &str) -> Option<&UploadFile> {
        self.files.iter().find(|f| f.field_name() == name)
    }

    /// All files uploaded under `name`.
    pub fn get_files<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a UploadFile> {
        self.files.iter().filter(move |f| f.field_name() == name)
    }

    /// Text fields in order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Files in order.
    #[must_use]
    pub fn files(&self) -> &[UploadFile] {
        &self.files
    }

    /// Whether any field or file is named `name`.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some() || self.get_file(name).is_some()
    }

    /// Number of fields plus files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len() + self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_executor::block_on;

    fn reader(body: &[u8], boundary: &str) -> MultipartReader {
        MultipartReader::new(
            BodyStream::from_bytes(body.to_vec()),
            boundary,
            MultipartConfig::default(),
        )
    }

    /// Body delivered in `size`-byte chunks.
    fn trickle(body: &[u8], size: usize) -> BodyStream {
        let chunks: Vec<_> = body.chunks(size).map(|c| Ok(c.to_vec())).collect();
        BodyStream::new(chunks)
    }

    const SIMPLE_FORM: &[u8] = b"------boundary\r\n\
        Content-Disposition: form-data; name=\"field1\"\r\n\
        \r\n\
        value1\r\n\
        ------boundary\r\n\
        Content-Disposition: form-data; name=\"field2\"\r\n\
        \r\n\
        value2\r\n\
        ------boundary--\r\n";

    const FILE_FORM: &[u8] = b"--AaB03x\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\
        \r\n\
        My Document\r\n\
        --AaB03x\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"doc.txt\"\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        Hello, World!\r\n\
        --AaB03x--\r\n";

    // ========================================================================
    // Boundary Tests
    // ========================================================================

    #[test]
    fn test_parse_boundary() {
        let ct = ContentType::parse("multipart/form-data; boundary=----WebKitFormBoundary7MA4YWxk");
        assert_eq!(parse_boundary(&ct).unwrap(), "----WebKitFormBoundary7MA4YWxk");
    }

    #[test]
    fn test_parse_boundary_quoted() {
        let ct = ContentType::parse("multipart/form-data; boundary=\"simple boundary\"");
        assert_eq!(parse_boundary(&ct).unwrap(), "simple boundary");
    }

    #[test]
    fn test_parse_boundary_case_insensitive_param_name() {
        let ct = ContentType::parse("multipart/form-data; BOUNDARY=abc123");
        assert_eq!(parse_boundary(&ct).unwrap(), "abc123");
    }

    #[test]
    fn test_parse_boundary_missing() {
        let ct = ContentType::parse("multipart/form-data");
        assert!(matches!(
            parse_boundary(&ct),
            Err(MultipartError::MissingBoundary)
        ));
    }

    #[test]
    fn test_parse_boundary_rejects_too_long_value() {
        let ct = ContentType::parse(&format!("multipart/form-data; boundary={}", "a".repeat(71)));
        assert!(matches!(
            parse_boundary(&ct),
            Err(MultipartError::InvalidBoundary)
        ));
    }

    #[test]
    fn test_parse_boundary_wrong_content_type() {
        let ct = ContentType::parse("application/json; boundary=abc");
        assert!(matches!(
            parse_boundary(&ct),
            Err(MultipartError::InvalidBoundary)
        ));
    }

    #[test]
    fn generated_boundaries_are_valid() {
        let boundary = generate_boundary();
        assert_eq!(boundary.len(), 32);
        let ct = ContentType::parse(&format!("multipart/form-data; boundary={boundary}"));
        assert_eq!(parse_boundary(&ct).unwrap(), boundary);
    }

    #[test]
    fn content_disposition_params() {
        let (name, filename) =
            parse_content_disposition("form-data; NAME=\"file\"; FileName=\"a.txt\"").unwrap();
        assert_eq!(name, "file");
        assert_eq!(filename.as_deref(), Some("a.txt"));
        assert!(parse_content_disposition("form-data").is_err());
        // Filenames pass through as sent.
        for raw in ["report..final.pdf", "C:\\Users\\me\\a.txt", "../../etc/passwd"] {
            let value = format!("form-data; name=\"f\"; filename=\"{raw}\"");
            let (_, filename) = parse_content_disposition(&value).unwrap();
            assert_eq!(filename.as_deref(), Some(raw));
        }
    }

    // ========================================================================
    // Decoder Tests
    // ========================================================================

    #[test]
    fn decoder_event_sequence() {
        let mut decoder = MultipartDecoder::new("----boundary", MultipartConfig::default());
        decoder.feed(SIMPLE_FORM);
        let Event::PartStart(head) = decoder.poll(true).unwrap() else {
            panic!("expected part start");
        };
        assert_eq!(head.name(), "field1");
        assert_eq!(decoder.poll(true).unwrap(), Event::Data(b"value1".to_vec()));
        assert_eq!(decoder.poll(true).unwrap(), Event::PartEnd);
        assert!(matches!(decoder.poll(true).unwrap(), Event::PartStart(_)));
        assert_eq!(decoder.poll(true).unwrap(), Event::Data(b"value2".to_vec()));
        assert_eq!(decoder.poll(true).unwrap(), Event::PartEnd);
        assert_eq!(decoder.poll(true).unwrap(), Event::Done);
        assert_eq!(decoder.poll(true).unwrap(), Event::Done);
        assert!(decoder.is_done());
    }

    #[test]
    fn decoder_needs_more_without_eof() {
        let mut decoder = MultipartDecoder::new("b", MultipartConfig::default());
        decoder.feed(b"--b\r\nContent-Disp");
        assert_eq!(decoder.poll(false).unwrap(), Event::NeedMore);
        assert!(matches!(
            decoder.poll(true),
            Err(MultipartError::UnexpectedEof)
        ));
    }

    #[test]
    fn decoder_failure_is_sticky() {
        let mut decoder = MultipartDecoder::new("b", MultipartConfig::default());
        decoder.feed(b"no boundary here");
        assert!(decoder.poll(true).is_err());
        decoder.feed(b"--b\r\n");
        assert!(decoder.poll(true).is_err());
    }

    #[test]
    fn preamble_and_epilogue_ignored() {
        let mut body = b"This is a preamble.\r\n".to_vec();
        body.extend_from_slice(SIMPLE_FORM);
        body.extend_from_slice(b"trailing epilogue");
        let mut reader = reader(&body, "----boundary");
        assert_eq!(reader.next_part().unwrap().unwrap().text().unwrap(), "value1");
        assert_eq!(reader.next_part().unwrap().unwrap().text().unwrap(), "value2");
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn opening_boundary_split_after_preamble() {
        let rest: &[u8] = b"\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nhello\r\n--XyZ--\r\n";
        for preamble in [&b"preamble\r\n"[..], b"\r\n", b""] {
            let mut body = preamble.to_vec();
            body.extend_from_slice(b"--XyZ");
            body.extend_from_slice(rest);
            for cut in 1..body.len() {
                let (head, tail) = body.split_at(cut);
                let stream = BodyStream::new(vec![Ok(head.to_vec()), Ok(tail.to_vec())]);
                let mut reader = MultipartReader::new(stream, "XyZ", MultipartConfig::default());
                let mut part = reader.next_part().unwrap().unwrap();
                assert_eq!(part.name(), "a", "cut at {cut}");
                assert_eq!(part.read_all().unwrap(), b"hello");
                drop(part);
                assert!(reader.next_part().unwrap().is_none());
            }
        }
    }

    #[test]
    fn lookahead_stays_bounded_for_large_parts() {
        let mut decoder = MultipartDecoder::new("XyZ", MultipartConfig::default());
        decoder.feed(b"--XyZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a\"\r\n\r\n");
        assert!(matches!(decoder.poll(false).unwrap(), Event::PartStart(_)));
        let mut seen = 0;
        for _ in 0..64 {
            decoder.feed(&[b'x'; 4096]);
            while let Event::Data(data) = decoder.poll(false).unwrap() {
                seen += data.len();
            }
            assert!(decoder.buffered() < 16);
        }
        assert_eq!(seen + decoder.buffered(), 64 * 4096);
    }

    // ========================================================================
    // Blocking Reader Tests
    // ========================================================================

    #[test]
    fn test_parse_simple_form() {
        let mut reader = reader(SIMPLE_FORM, "----boundary");
        let mut part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.name(), "field1");
        assert!(part.filename().is_none());
        assert_eq!(part.read_all().unwrap(), b"value1");
        let mut part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.name(), "field2");
        assert_eq!(part.read_all().unwrap(), b"value2");
        assert!(reader.next_part().unwrap().is_none());
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_parse_file_upload() {
        let mut reader = reader(FILE_FORM, "AaB03x");
        reader.next_part().unwrap().unwrap().discard().unwrap();
        let mut part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.filename(), Some("doc.txt"));
        assert_eq!(part.content_type(), Some("text/plain"));
        assert_eq!(part.read_all().unwrap(), b"Hello, World!");
    }

    #[test]
    fn unread_part_data_is_discarded() {
        let mut reader = reader(FILE_FORM, "AaB03x");
        {
            let part = reader.next_part().unwrap().unwrap();
            assert_eq!(part.name(), "title");
        }
        let part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.name(), "file");
    }

    #[test]
    fn test_boundary_like_sequence_in_part_body_does_not_terminate_part() {
        let body = b"--XyZ\r\n\
            Content-Disposition: form-data; name=\"f\"\r\n\
            \r\n\
            line1\r\n--XyZ-not-really\r\n--XyZZ\r\nline2\r\n\
            --XyZ--\r\n";
        let mut reader = reader(body, "XyZ");
        let mut part = reader.next_part().unwrap().unwrap();
        assert_eq!(
            part.read_all().unwrap(),
            b"line1\r\n--XyZ-not-really\r\n--XyZZ\r\nline2"
        );
        drop(part);
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn one_byte_chunks_decode_identically() {
        for size in [1, 2, 3, 7, 64] {
            let mut reader = MultipartReader::new(
                trickle(FILE_FORM, size),
                "AaB03x",
                MultipartConfig::default(),
            );
            assert_eq!(
                reader.next_part().unwrap().unwrap().text().unwrap(),
                "My Document"
            );
            let mut file = reader.next_part().unwrap().unwrap();
            assert_eq!(file.read_all().unwrap(), b"Hello, World!");
            drop(file);
            assert!(reader.next_part().unwrap().is_none());
        }
    }

    #[test]
    fn missing_closing_boundary_is_malformed() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue";
        let mut reader = reader(body, "b");
        let mut part = reader.next_part().unwrap().unwrap();
        let err = part.read_all().unwrap_err();
        assert!(matches!(err, MultipartError::UnexpectedEof));
        assert_eq!(err.status_code(), 400);
        assert!(matches!(Error::from(err), Error::MalformedBody(_)));
    }

    #[test]
    fn missing_content_disposition() {
        let body = b"--b\r\nContent-Type: text/plain\r\n\r\nx\r\n--b--\r\n";
        assert!(matches!(
            reader(body, "b").next_part(),
            Err(MultipartError::MissingContentDisposition)
        ));
    }

    #[test]
    fn header_block_too_long() {
        let mut body = b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\nX-Pad: ".to_vec();
        body.extend_from_slice(&[b'p'; 512]);
        body.extend_from_slice(b"\r\n\r\nv\r\n--b--\r\n");
        let mut reader = MultipartReader::new(
            BodyStream::from_bytes(body),
            "b",
            MultipartConfig::default().max_header_size(128),
        );
        assert!(matches!(
            reader.next_part(),
            Err(MultipartError::InvalidPartHeaders { .. })
        ));
    }

    #[test]
    fn too_many_fields() {
        let mut reader = MultipartReader::new(
            BodyStream::from_bytes(SIMPLE_FORM.to_vec()),
            "----boundary",
            MultipartConfig::default().max_fields(1),
        );
        reader.next_part().unwrap().unwrap().discard().unwrap();
        assert!(matches!(
            reader.next_part(),
            Err(MultipartError::TooManyFields { count: 2, max: 1 })
        ));
    }

    #[test]
    fn file_too_large() {
        let mut reader = MultipartReader::new(
            BodyStream::from_bytes(FILE_FORM.to_vec()),
            "AaB03x",
            MultipartConfig::default().max_file_size(5),
        );
        reader.next_part().unwrap().unwrap().discard().unwrap();
        let mut file = reader.next_part().unwrap().unwrap();
        let err = file.read_all().unwrap_err();
        assert!(matches!(err, MultipartError::FileTooLarge { max: 5, .. }));
        assert_eq!(err.status_code(), 413);
        assert!(matches!(
            Error::from(err),
            Error::PayloadTooLarge { limit: 5 }
        ));
    }

    #[test]
    fn stream_errors_pass_through() {
        let body = BodyStream::new(vec![
            Ok(b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nval".to_vec()),
            Err(StreamReadError::Disconnected),
        ]);
        let mut reader = MultipartReader::new(body, "b", MultipartConfig::default());
        let mut part = reader.next_part().unwrap().unwrap();
        let err = part.read_all().unwrap_err();
        assert!(Error::from(err).is_disconnect());
    }

    // ========================================================================
    // Encoder Tests
    // ========================================================================

    #[test]
    fn encoder_matches_hand_written_body() {
        let title = HeaderMap::from_pairs([(
            "Content-Disposition",
            "form-data; name=\"title\"",
        )])
        .unwrap();
        let file = HeaderMap::from_pairs([
            (
                "Content-Disposition",
                "form-data; name=\"file\"; filename=\"doc.txt\"",
            ),
            ("Content-Type", "text/plain"),
        ])
        .unwrap();
        let encoded = MultipartEncoder::new("AaB03x").encode([
            (&title, &b"My Document"[..]),
            (&file, &b"Hello, World!"[..]),
        ]);
        assert_eq!(encoded, FILE_FORM);
    }

    // ========================================================================
    // Form Collection Tests
    // ========================================================================

    #[test]
    fn test_multipart_form_helpers() {
        let form = MultipartForm::collect(&mut reader(FILE_FORM, "AaB03x")).unwrap();
        assert_eq!(form.len(), 2);
        assert_eq!(form.get_field("title"), Some("My Document"));
        assert!(form.has_field("file"));
        let file = form.get_file("file").unwrap();
        assert_eq!(file.filename(), "doc.txt");
        assert_eq!(file.safe_filename(), Some("doc.txt"));
        assert_eq!(file.extension(), Some("txt"));
        assert_eq!(file.content_type(), Some("text/plain"));
        assert_eq!(file.size(), 13);
        assert!(!file.is_spooled());
        assert_eq!(file.bytes().unwrap(), b"Hello, World!");
        assert_eq!(form.fields().collect::<Vec<_>>(), [("title", "My Document")]);
    }

    #[test]
    fn test_upload_file_spools_large_payload() {
        let mut reader = MultipartReader::new(
            trickle(FILE_FORM, 4),
            "AaB03x",
            MultipartConfig::default().spool_threshold(8),
        );
        let form = MultipartForm::collect(&mut reader).unwrap();
        let file = form.get_file("file").unwrap();
        assert!(file.is_spooled());
        assert_eq!(file.bytes().unwrap(), b"Hello, World!");
        assert_eq!(file.bytes().unwrap(), b"Hello, World!");
        // Text fields stay in memory regardless of threshold.
        assert_eq!(form.get_field("title"), Some("My Document"));
    }

    #[test]
    fn safe_filename_keeps_last_component() {
        let cases = [
            ("report..final.pdf", Some("report..final.pdf")),
            ("uploads/../notes.txt", Some("notes.txt")),
            ("dir/..", None),
        ];
        for (raw, safe) in cases {
            let disposition = format!("form-data; name=\"f\"; filename=\"{raw}\"");
            let head = HeaderMap::from_pairs([("Content-Disposition", disposition)]).unwrap();
            let body = MultipartEncoder::new("b").encode([(&head, &b"x"[..])]);
            let form = MultipartForm::collect(&mut reader(&body, "b")).unwrap();
            let file = form.get_file("f").unwrap();
            assert_eq!(file.filename(), raw);
            assert_eq!(file.safe_filename(), safe, "{raw}");
        }
    }

    #[test]
    fn repeated_field_names() {
        let body = MultipartEncoder::new("b").encode([
            (
                &HeaderMap::from_pairs([("Content-Disposition", "form-data; name=\"tag\"")])
                    .unwrap(),
                &b"a"[..],
            ),
            (
                &HeaderMap::from_pairs([("Content-Disposition", "form-data; name=\"tag\"")])
                    .unwrap(),
                &b"b"[..],
            ),
        ]);
        let form = MultipartForm::collect(&mut reader(&body, "b")).unwrap();
        assert_eq!(form.get_fields("tag").collect::<Vec<_>>(), ["a", "b"]);
    }

    // ========================================================================
    // Cooperative Reader Tests
    // ========================================================================

    #[test]
    fn async_reader_parts() {
        block_on(async {
            let chunks: Vec<_> = FILE_FORM.chunks(5).map(|c| Ok(c.to_vec())).collect();
            let body = AsyncBodyStream::new(futures::stream::iter(chunks));
            let mut reader = AsyncMultipartReader::new(body, "AaB03x", MultipartConfig::default());
            let mut title = reader.next_part().await.unwrap().unwrap();
            assert_eq!(title.text().await.unwrap(), "My Document");
            let file = reader.next_part().await.unwrap().unwrap();
            assert_eq!(file.filename(), Some("doc.txt"));
            file.discard().await.unwrap();
            assert!(reader.next_part().await.unwrap().is_none());
        });
    }

    #[test]
    fn async_form_collect() {
        block_on(async {
            let body = AsyncBodyStream::from_bytes(FILE_FORM.to_vec());
            let mut reader = AsyncMultipartReader::new(body, "AaB03x", MultipartConfig::default());
            let form = MultipartForm::collect_async(&mut reader).await.unwrap();
            assert_eq!(form.get_field("title"), Some("My Document"));
            assert_eq!(form.get_file("file").unwrap().size(), 13);
        });
    }
}
