//! File responses end to end: ranges, conditional requests and HEAD, in
//! both rendering conventions.

use std::path::{Path, PathBuf};

use proptest::prelude::*;
use tandem_core::{FileResponse, HeaderMap, Method, RequestHead, Response};
use tempfile::TempDir;

fn fixture() -> (TempDir, PathBuf, Vec<u8>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &content).unwrap();
    (dir, path, content)
}

fn request(method: Method, headers: &[(&str, &str)]) -> RequestHead {
    RequestHead::new(method, "/data.bin")
        .with_headers(HeaderMap::from_pairs(headers.iter().copied()).unwrap())
}

fn get(headers: &[(&str, &str)]) -> RequestHead {
    request(Method::Get, headers)
}

fn render(path: &Path, head: &RequestHead) -> (u16, HeaderMap, Vec<u8>) {
    let rendered = Response::file(path).unwrap().render_blocking(head).unwrap();
    let status = rendered.status;
    let headers = rendered.headers.clone();
    (status, headers, rendered.collect().unwrap())
}

// ============================================================================
// Full and single-range responses
// ============================================================================

#[test]
fn full_file() {
    let (_dir, path, content) = fixture();
    let (status, headers, body) = render(&path, &get(&[]));
    assert_eq!(status, 200);
    assert_eq!(headers.get("accept-ranges"), Some("bytes"));
    assert_eq!(headers.get("content-length"), Some("1000"));
    assert_eq!(headers.get("content-type"), Some("application/octet-stream"));
    assert!(headers.get("etag").is_some());
    assert!(headers.get("last-modified").is_some());
    assert_eq!(body, content);
}

#[test]
fn single_range() {
    let (_dir, path, content) = fixture();
    let (status, headers, body) = render(&path, &get(&[("range", "bytes=100-199")]));
    assert_eq!(status, 206);
    assert_eq!(headers.get("content-range"), Some("bytes 100-199/1000"));
    assert_eq!(headers.get("content-length"), Some("100"));
    assert_eq!(body, &content[100..200]);
}

#[test]
fn suffix_and_open_ranges() {
    let (_dir, path, content) = fixture();
    let (_, headers, body) = render(&path, &get(&[("range", "bytes=-10")]));
    assert_eq!(headers.get("content-range"), Some("bytes 990-999/1000"));
    assert_eq!(body, &content[990..]);

    let (_, headers, body) = render(&path, &get(&[("range", "bytes=995-")]));
    assert_eq!(headers.get("content-range"), Some("bytes 995-999/1000"));
    assert_eq!(body, &content[995..]);
}

#[test]
fn small_chunks_still_cover_the_range() {
    let (_dir, path, content) = fixture();
    let response: Response = FileResponse::new(&path).unwrap().chunk_size(7).into();
    let rendered = response
        .render_blocking(&get(&[("range", "bytes=3-50")]))
        .unwrap();
    let chunks: Vec<Vec<u8>> = rendered.body.map(Result::unwrap).collect();
    assert!(chunks.iter().all(|c| c.len() <= 7));
    assert_eq!(chunks.concat(), &content[3..=50]);
}

// ============================================================================
// Multiple ranges
// ============================================================================

#[test]
fn multiple_ranges_are_multipart() {
    let (_dir, path, content) = fixture();
    let (status, headers, body) = render(&path, &get(&[("range", "bytes=0-99, 900-999")]));
    assert_eq!(status, 206);

    let content_type = headers.get("content-type").unwrap();
    let boundary = content_type
        .strip_prefix("multipart/byteranges; boundary=")
        .unwrap();
    assert_eq!(
        headers.get("content-length"),
        Some(body.len().to_string().as_str())
    );

    let mut expected = Vec::new();
    for (start, end) in [(0usize, 99usize), (900, 999)] {
        expected.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Type: application/octet-stream\r\nContent-Range: bytes {start}-{end}/1000\r\n\r\n"
            )
            .as_bytes(),
        );
        expected.extend_from_slice(&content[start..=end]);
        expected.extend_from_slice(b"\r\n");
    }
    expected.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    assert_eq!(body, expected);
}

#[test]
fn overlapping_ranges_coalesce() {
    let (_dir, path, content) = fixture();
    let (status, headers, body) = render(&path, &get(&[("range", "bytes=0-50,40-99")]));
    assert_eq!(status, 206);
    assert_eq!(headers.get("content-range"), Some("bytes 0-99/1000"));
    assert_eq!(body, &content[..100]);
}

// ============================================================================
// Errors and preconditions
// ============================================================================

#[test]
fn unsatisfiable_range() {
    let (_dir, path, _) = fixture();
    let (status, headers, body) = render(&path, &get(&[("range", "bytes=1000-2000")]));
    assert_eq!(status, 416);
    assert_eq!(headers.get("content-range"), Some("bytes */1000"));
    assert!(body.is_empty());
}

#[test]
fn malformed_range() {
    let (_dir, path, _) = fixture();
    let (status, _, body) = render(&path, &get(&[("range", "bytes: 0-1000")]));
    assert_eq!(status, 400);
    assert!(body.is_empty());
}

#[test]
fn if_none_match_beats_range() {
    let (_dir, path, _) = fixture();
    let etag = FileResponse::new(&path).unwrap().meta().etag();
    let (status, headers, body) = render(
        &path,
        &get(&[("if-none-match", etag.as_str()), ("range", "bytes=0-9")]),
    );
    assert_eq!(status, 304);
    assert_eq!(headers.get("etag"), Some(etag.as_str()));
    assert!(body.is_empty());
}

#[test]
fn if_range_must_match_exactly() {
    let (_dir, path, content) = fixture();
    let etag = FileResponse::new(&path).unwrap().meta().etag();

    let (status, _, body) = render(
        &path,
        &get(&[("if-range", etag.as_str()), ("range", "bytes=0-9")]),
    );
    assert_eq!(status, 206);
    assert_eq!(body, &content[..10]);

    let truncated = &etag[..etag.len() - 2];
    let (status, _, body) = render(
        &path,
        &get(&[("if-range", truncated), ("range", "bytes=0-9")]),
    );
    assert_eq!(status, 200);
    assert_eq!(body, content);
}

#[test]
fn if_match_failure() {
    let (_dir, path, _) = fixture();
    let (status, _, body) = render(&path, &get(&[("if-match", "\"nope\"")]));
    assert_eq!(status, 412);
    assert!(body.is_empty());
}

#[test]
fn head_keeps_length() {
    let (_dir, path, _) = fixture();
    let (status, headers, body) = render(&path, &request(Method::Head, &[]));
    assert_eq!(status, 200);
    assert_eq!(headers.get("content-length"), Some("1000"));
    assert!(body.is_empty());
}

#[test]
fn range_ignored_for_post() {
    let (_dir, path, content) = fixture();
    let (status, _, body) = render(&path, &request(Method::Post, &[("range", "bytes=0-9")]));
    assert_eq!(status, 200);
    assert_eq!(body, content);
}

#[test]
fn text_files_get_charset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "hello").unwrap();
    let (_, headers, _) = render(&path, &get(&[]));
    assert_eq!(headers.get("content-type"), Some("text/plain; charset=utf-8"));
}

#[test]
fn empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.bin");
    std::fs::write(&path, b"").unwrap();
    let (status, headers, body) = render(&path, &get(&[]));
    assert_eq!(status, 200);
    assert_eq!(headers.get("content-length"), Some("0"));
    assert!(body.is_empty());
}

// ============================================================================
// Cooperative rendering
// ============================================================================

#[tokio::test]
async fn async_single_range() {
    let (_dir, path, content) = fixture();
    let rendered = Response::file(&path)
        .unwrap()
        .render_async(&get(&[("range", "bytes=10-19")]))
        .await
        .unwrap();
    assert_eq!(rendered.status, 206);
    assert_eq!(rendered.collect().await.unwrap(), &content[10..20]);
}

#[tokio::test]
async fn async_matches_blocking_for_multiple_ranges() {
    let (_dir, path, _) = fixture();
    let head = get(&[("range", "bytes=0-9,500-509,990-")]);
    let (_, blocking_headers, blocking_body) = render(&path, &head);

    let rendered = Response::file(&path)
        .unwrap()
        .render_async(&head)
        .await
        .unwrap();
    assert_eq!(rendered.status, 206);
    let async_headers = rendered.headers.clone();
    let async_body = rendered.collect().await.unwrap();

    // Boundaries are random per response; compare with them masked out.
    let boundary = |h: &HeaderMap| {
        h.get("content-type")
            .and_then(|ct| ct.split("boundary=").nth(1))
            .unwrap()
            .to_owned()
    };
    let mask = |body: Vec<u8>, b: &str| String::from_utf8_lossy(&body).replace(b, "B");
    assert_eq!(
        mask(blocking_body, &boundary(&blocking_headers)),
        mask(async_body, &boundary(&async_headers))
    );
}

#[tokio::test]
async fn async_head_skips_file() {
    let (_dir, path, _) = fixture();
    let rendered = Response::file(&path)
        .unwrap()
        .render_async(&request(Method::Head, &[("range", "bytes=0-9")]))
        .await
        .unwrap();
    assert_eq!(rendered.status, 206);
    assert_eq!(rendered.headers.get("content-length"), Some("10"));
    assert!(rendered.collect().await.unwrap().is_empty());
}

// ============================================================================
// Any satisfiable single range
// ============================================================================

/// File size, an inclusive range inside it, and a read size.
fn single_range_case() -> impl Strategy<Value = (usize, usize, usize, usize)> {
    (1usize..4096).prop_flat_map(|size| {
        (0..size).prop_flat_map(move |start| {
            (Just(size), Just(start), start..size, 1usize..300)
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn single_range_bytes_in_both_conventions((size, start, end, chunk) in single_range_case()) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let content: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let range = format!("bytes={start}-{end}");
        let head = get(&[("range", range.as_str())]);
        let expected_range = format!("bytes {start}-{end}/{size}");
        let file = || -> Response { FileResponse::new(&path).unwrap().chunk_size(chunk).into() };

        let rendered = file().render_blocking(&head).unwrap();
        prop_assert_eq!(rendered.status, 206);
        prop_assert_eq!(rendered.headers.get("content-range"), Some(expected_range.as_str()));
        prop_assert_eq!(rendered.collect().unwrap(), &content[start..=end]);

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (status, content_range, body) = runtime.block_on(async {
            let rendered = file().render_async(&head).await.unwrap();
            let status = rendered.status;
            let content_range = rendered.headers.get("content-range").map(str::to_owned);
            (status, content_range, rendered.collect().await.unwrap())
        });
        prop_assert_eq!(status, 206);
        prop_assert_eq!(content_range.as_deref(), Some(expected_range.as_str()));
        prop_assert_eq!(body, &content[start..=end]);
    }
}
