//! Partial-content file serving.
//!
//! Given the file's size and modification time plus the request headers,
//! [`plan_file`] decides the status, the extra headers, and the list of
//! [`Segment`]s that make up the body. Nothing here opens or reads the
//! file: the plan names byte offsets and the two segment readers turn it
//! into a chunk sequence by seeking, so a 416 or 304 never touches disk.
//!
//! # Conditional requests
//!
//! Preconditions are checked in this order, the first that applies wins:
//!
//! 1. `If-Match` fails → 412; otherwise `If-Unmodified-Since` fails → 412
//! 2. `If-None-Match` matches → 304 for GET/HEAD, 412 for other methods;
//!    otherwise `If-Modified-Since` not older than the file → 304
//!    (GET/HEAD only)
//! 3. `If-Range` that does not match the current validator turns a range
//!    request into a full 200
//!
//! A 304 is produced regardless of any `Range` header. A `Range` that
//! still names more than [`MAX_RANGES`] disjoint intervals after merging
//! is ignored and the whole file is sent.

use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::stream::Stream;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::date;
use crate::error::{Error, Result};
use crate::headers::HeaderMap;
use crate::multipart::MultipartEncoder;
use crate::request::Method;

/// Most disjoint intervals served as `multipart/byteranges`.
pub const MAX_RANGES: usize = 100;

/// An inclusive byte interval within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a range covers at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `bytes <start>-<end>/<size>`.
    #[must_use]
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

/// Parse a `Range` header against a file of `size` bytes.
///
/// Returns the satisfiable intervals sorted and with overlapping or
/// adjacent ones merged. A header that is not a `bytes=` set, or an
/// interval whose start exceeds its end, is [`Error::MalformedRange`].
/// An interval starting or ending past the last byte, a zero-length
/// suffix, or any range over an empty file is
/// [`Error::UnsatisfiableRange`]. Suffix ranges longer than the file are
/// clamped to the whole file.
pub fn parse_range(header: &str, size: u64) -> Result<Vec<ByteRange>> {
    let malformed = || Error::MalformedRange(header.to_owned());
    let unsatisfiable = || Error::UnsatisfiableRange { size };

    let set = header.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
    let mut ranges = Vec::new();
    for item in set.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (first, last) = item.split_once('-').ok_or_else(malformed)?;
        let (first, last) = (first.trim(), last.trim());
        let range = if first.is_empty() {
            let suffix: u64 = last.parse().map_err(|_| malformed())?;
            if suffix == 0 || size == 0 {
                return Err(unsatisfiable());
            }
            ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            }
        } else {
            let start: u64 = first.parse().map_err(|_| malformed())?;
            let end = if last.is_empty() {
                size.checked_sub(1).ok_or_else(unsatisfiable)?
            } else {
                let end: u64 = last.parse().map_err(|_| malformed())?;
                if start > end {
                    return Err(malformed());
                }
                end
            };
            if start >= size || end >= size {
                return Err(unsatisfiable());
            }
            ByteRange { start, end }
        };
        ranges.push(range);
    }
    if ranges.is_empty() {
        return Err(malformed());
    }
    Ok(coalesce(ranges))
}

fn coalesce(mut ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

// ============================================================================
// Validators
// ============================================================================

/// Size and modification time of a served file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    size: u64,
    modified: SystemTime,
}

impl FileMeta {
    #[must_use]
    pub fn new(size: u64, modified: SystemTime) -> Self {
        Self { size, modified }
    }

    /// Read from filesystem metadata; a platform without mtimes reports the
    /// epoch.
    #[must_use]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self::new(
            metadata.len(),
            metadata.modified().unwrap_or(UNIX_EPOCH),
        )
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Strong validator `"<size hex>-<mtime nanos hex>"`.
    #[must_use]
    pub fn etag(&self) -> String {
        let nanos = self
            .modified
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        format!("\"{:x}-{nanos:x}\"", self.size)
    }

    /// `Last-Modified` header value.
    #[must_use]
    pub fn last_modified(&self) -> String {
        date::format_http_date(self.modified)
    }

    fn modified_secs(&self) -> SystemTime {
        date::truncate_to_secs(self.modified)
    }
}

fn is_weak(tag: &str) -> bool {
    tag.starts_with("W/")
}

fn opaque(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// Strong comparison against a comma-separated tag list or `*`.
fn matches_strong(list: &str, etag: &str) -> bool {
    list.split(',')
        .map(str::trim)
        .any(|tag| tag == "*" || (!is_weak(tag) && tag == etag))
}

/// Weak comparison against a comma-separated tag list or `*`.
fn matches_weak(list: &str, etag: &str) -> bool {
    list.split(',')
        .map(str::trim)
        .any(|tag| tag == "*" || opaque(tag) == opaque(etag))
}

/// Evaluate the conditional headers.
///
/// Returns whether a `Range` header may be honored, or the short-circuit
/// as [`Error::NotModified`] / [`Error::PreconditionFailed`].
pub fn evaluate_preconditions(method: &Method, headers: &HeaderMap, meta: &FileMeta) -> Result<bool> {
    let etag = meta.etag();
    let read_only = method.is_get_or_head();

    if let Some(list) = headers.get("if-match") {
        if !matches_strong(list, &etag) {
            return Err(Error::PreconditionFailed);
        }
    } else if let Some(since) = headers.get("if-unmodified-since").and_then(date::parse_http_date) {
        if meta.modified_secs() > since {
            return Err(Error::PreconditionFailed);
        }
    }

    if let Some(list) = headers.get("if-none-match") {
        if matches_weak(list, &etag) {
            return Err(if read_only {
                Error::NotModified
            } else {
                Error::PreconditionFailed
            });
        }
    } else if read_only {
        if let Some(since) = headers.get("if-modified-since").and_then(date::parse_http_date) {
            if meta.modified_secs() <= since {
                return Err(Error::NotModified);
            }
        }
    }

    let honor_range = match headers.get("if-range").map(str::trim) {
        None => true,
        Some(tag) if tag.starts_with('"') || is_weak(tag) => !is_weak(tag) && tag == etag,
        Some(value) => date::parse_http_date(value) == Some(meta.modified_secs()),
    };
    Ok(honor_range)
}

// ============================================================================
// Plans
// ============================================================================

/// One piece of a planned body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Framing bytes produced in memory.
    Bytes(Vec<u8>),
    /// `len` bytes of the file starting at `start`.
    Slice { start: u64, len: u64 },
}

impl Segment {
    fn len(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Slice { len, .. } => *len,
        }
    }
}

/// Status, headers, and body layout for one file response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlan {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub segments: Vec<Segment>,
}

impl FilePlan {
    /// Exact body length.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Whether serving this plan reads the file at all.
    #[must_use]
    pub fn reads_file(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Slice { .. }))
    }

    fn empty(status: u16, headers: Vec<(&'static str, String)>) -> Self {
        Self {
            status,
            headers,
            segments: Vec::new(),
        }
    }
}

/// Plan the response for a file with `meta`, served as `content_type`.
///
/// Range requests are only honored for GET and HEAD. Short-circuits
/// (304, 400, 412, 416) come back as plans with empty bodies rather than
/// errors.
#[must_use]
pub fn plan_file(method: &Method, headers: &HeaderMap, meta: &FileMeta, content_type: &str) -> FilePlan {
    match build_plan(method, headers, meta, content_type) {
        Ok(plan) => plan,
        Err(err) => {
            debug!(status = err.status_code(), error = %err, "file response short-circuited");
            short_circuit(&err, meta)
        }
    }
}

fn short_circuit(err: &Error, meta: &FileMeta) -> FilePlan {
    match err {
        Error::NotModified => FilePlan::empty(
            304,
            vec![("etag", meta.etag()), ("last-modified", meta.last_modified())],
        ),
        Error::UnsatisfiableRange { size } => {
            FilePlan::empty(416, vec![("content-range", format!("bytes */{size}"))])
        }
        other => FilePlan::empty(other.status_code(), Vec::new()),
    }
}

fn build_plan(method: &Method, headers: &HeaderMap, meta: &FileMeta, content_type: &str) -> Result<FilePlan> {
    let honor_range = evaluate_preconditions(method, headers, meta)?;
    let size = meta.size();
    let mut out_headers = vec![
        ("accept-ranges", "bytes".to_owned()),
        ("etag", meta.etag()),
        ("last-modified", meta.last_modified()),
    ];

    let range_header = headers
        .get("range")
        .filter(|_| honor_range && method.is_get_or_head());
    let ranges = range_header
        .map(|header| parse_range(header, size))
        .transpose()?
        .filter(|ranges| {
            let within = ranges.len() <= MAX_RANGES;
            if !within {
                debug!(ranges = ranges.len(), "too many ranges, sending the whole file");
            }
            within
        });
    let Some(ranges) = ranges else {
        out_headers.push(("content-type", content_type.to_owned()));
        let segments = if size == 0 {
            Vec::new()
        } else {
            vec![Segment::Slice { start: 0, len: size }]
        };
        return Ok(FilePlan {
            status: 200,
            headers: out_headers,
            segments,
        });
    };

    debug!(ranges = ranges.len(), size, "serving partial content");
    if let [range] = ranges.as_slice() {
        out_headers.push(("content-type", content_type.to_owned()));
        out_headers.push(("content-range", range.content_range(size)));
        return Ok(FilePlan {
            status: 206,
            headers: out_headers,
            segments: vec![Segment::Slice {
                start: range.start,
                len: range.len(),
            }],
        });
    }

    let encoder = MultipartEncoder::random();
    out_headers.push((
        "content-type",
        format!("multipart/byteranges; boundary={}", encoder.boundary()),
    ));
    Ok(FilePlan {
        status: 206,
        headers: out_headers,
        segments: byteranges_layout(&encoder, &ranges, size, content_type),
    })
}

/// Interleave part framing with file slices for `multipart/byteranges`.
fn byteranges_layout(
    encoder: &MultipartEncoder,
    ranges: &[ByteRange],
    size: u64,
    content_type: &str,
) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(ranges.len() * 3 + 1);
    for range in ranges {
        let content_range = range.content_range(size);
        segments.push(Segment::Bytes(encoder.part_head([
            ("Content-Type", content_type),
            ("Content-Range", content_range.as_str()),
        ])));
        segments.push(Segment::Slice {
            start: range.start,
            len: range.len(),
        });
        segments.push(Segment::Bytes(MultipartEncoder::PART_TAIL.to_vec()));
    }
    segments.push(Segment::Bytes(encoder.closing()));
    segments
}

// ============================================================================
// Segment readers
// ============================================================================

/// Blocking reader: seeks to each slice and reads it in `chunk_size` pieces.
pub struct SegmentReader<F> {
    file: F,
    segments: VecDeque<Segment>,
    remaining: u64,
    chunk_size: usize,
    failed: bool,
}

impl<F: Read + Seek> SegmentReader<F> {
    pub fn new(file: F, segments: Vec<Segment>, chunk_size: usize) -> Self {
        Self {
            file,
            segments: segments.into(),
            remaining: 0,
            chunk_size: chunk_size.max(1),
            failed: false,
        }
    }

    fn advance(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if self.remaining > 0 {
                let len = chunk_len(self.remaining, self.chunk_size);
                let mut buf = vec![0; len];
                self.file.read_exact(&mut buf)?;
                self.remaining -= len as u64;
                return Ok(Some(buf));
            }
            match self.segments.pop_front() {
                None => return Ok(None),
                Some(Segment::Bytes(bytes)) if bytes.is_empty() => {}
                Some(Segment::Bytes(bytes)) => return Ok(Some(bytes)),
                Some(Segment::Slice { start, len }) => {
                    self.file.seek(SeekFrom::Start(start))?;
                    self.remaining = len;
                }
            }
        }
    }
}

impl<F: Read + Seek> Iterator for SegmentReader<F> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.advance().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

fn chunk_len(remaining: u64, chunk_size: usize) -> usize {
    usize::try_from(remaining).map_or(chunk_size, |r| r.min(chunk_size))
}

struct AsyncSegments {
    file: tokio::fs::File,
    segments: VecDeque<Segment>,
    remaining: u64,
    chunk_size: usize,
}

impl AsyncSegments {
    async fn advance(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if self.remaining > 0 {
                let len = chunk_len(self.remaining, self.chunk_size);
                let mut buf = vec![0; len];
                self.file.read_exact(&mut buf).await?;
                self.remaining -= len as u64;
                return Ok(Some(buf));
            }
            match self.segments.pop_front() {
                None => return Ok(None),
                Some(Segment::Bytes(bytes)) if bytes.is_empty() => {}
                Some(Segment::Bytes(bytes)) => return Ok(Some(bytes)),
                Some(Segment::Slice { start, len }) => {
                    self.file.seek(SeekFrom::Start(start)).await?;
                    self.remaining = len;
                }
            }
        }
    }
}

/// Cooperative reader: every seek and read is its own await point.
pub fn read_segments_async(
    file: tokio::fs::File,
    segments: Vec<Segment>,
    chunk_size: usize,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send {
    let state = AsyncSegments {
        file,
        segments: segments.into(),
        remaining: 0,
        chunk_size: chunk_size.max(1),
    };
    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        match state.advance().await {
            Ok(Some(chunk)) => Some((Ok(chunk), Some(state))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}
