//! Integration tests for device streaming and the HTTP fetcher.

mod common;

use std::io::Read;

use common::{pattern, serve, Reply};
use ovfexport_core::cookie::SessionCookie;
use ovfexport_core::manifest::compute_sha256;
use ovfexport_core::stream::{stream_device, StreamProgress};
use ovfexport_core::{DeviceFetcher, Error, HttpFetcher, ProgressState};

/// Yields the given chunks one `read` at a time.
struct ChunkedReader {
    chunks: Vec<Vec<u8>>,
    next: usize,
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(chunk) = self.chunks.get(self.next) else {
            return Ok(0);
        };
        assert!(chunk.len() <= buf.len(), "test chunk larger than read buffer");
        buf[..chunk.len()].copy_from_slice(chunk);
        self.next += 1;
        Ok(chunk.len())
    }
}

fn progress(state: &ProgressState, bytes_before: u64) -> StreamProgress<'_> {
    StreamProgress {
        state,
        bytes_before,
        callback: None,
        device: "disk.vmdk",
    }
}

#[test]
fn test_stream_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("disk.vmdk");
    let chunks: Vec<Vec<u8>> = (0..7u8).map(|i| pattern(100 + i as usize * 37, i)).collect();
    let expected: Vec<u8> = chunks.concat();
    let state = ProgressState::new(expected.len() as u64);

    let out = stream_device(
        "https://esx/nfc/disk",
        ChunkedReader { chunks, next: 0 },
        &dest,
        2048,
        &progress(&state, 0),
    )
    .unwrap();

    assert_eq!(out.bytes, expected.len() as u64);
    assert_eq!(out.sha256, compute_sha256(&expected));
    assert_eq!(std::fs::read(&dest).unwrap(), expected);
    assert_eq!(state.percent(), 100);
}

#[test]
fn test_stream_splits_large_body_into_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("disk.vmdk");
    let body = pattern(10_000, 9);
    let state = ProgressState::new(10_000);

    let out = stream_device("u", std::io::Cursor::new(body.clone()), &dest, 2048, &progress(&state, 0))
        .unwrap();

    assert_eq!(out.bytes, 10_000);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[test]
fn test_progress_across_sequential_devices() {
    let dir = tempfile::tempdir().unwrap();
    let state = ProgressState::new(1000);

    let first = stream_device(
        "u0",
        std::io::Cursor::new(pattern(400, 0)),
        &dir.path().join("disk-0.vmdk"),
        2048,
        &progress(&state, 0),
    )
    .unwrap();
    assert_eq!(state.percent(), 40);

    stream_device(
        "u1",
        std::io::Cursor::new(pattern(600, 1)),
        &dir.path().join("disk-1.vmdk"),
        2048,
        &progress(&state, first.bytes),
    )
    .unwrap();
    assert_eq!(state.percent(), 100);
    assert_eq!(state.bytes_written(), 1000);
}

#[test]
fn test_progress_clamps_when_total_underestimates() {
    let dir = tempfile::tempdir().unwrap();
    let state = ProgressState::new(100);

    stream_device(
        "u",
        std::io::Cursor::new(pattern(5000, 0)),
        &dir.path().join("disk.vmdk"),
        512,
        &progress(&state, 0),
    )
    .unwrap();
    assert_eq!(state.percent(), 100);
}

// =============================================================================
// HTTP fetcher
// =============================================================================

fn disk_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/nfc/52a1/disk-0.vmdk")
}

fn fetcher() -> HttpFetcher {
    let cookie = SessionCookie::parse("vmware_soap_session=\"52a1\"; Path=/; HttpOnly").unwrap();
    HttpFetcher::new(&cookie, true).unwrap()
}

#[test]
fn test_http_fetcher_streams_body_with_session_cookie() {
    let body = pattern(5000, 3);
    let (port, requests) = serve(vec![Reply::ok(body.clone())]);
    let url = disk_url(port);

    let mut reader = fetcher().open(&url).unwrap();
    let mut received = Vec::new();
    reader.read_to_end(&mut received).unwrap();
    assert_eq!(received, body);

    let head = requests.recv().unwrap().head;
    assert!(head.starts_with("get /nfc/52a1/disk-0.vmdk"));
    assert!(head.contains("cookie: vmware_soap_session= \"52a1\"; $path=/"));
    assert!(head.contains("accept: application/x-vnd.vmware-streamvmdk"));
}

#[test]
fn test_http_fetcher_rejects_error_status() {
    let (port, _requests) = serve(vec![Reply::status("404 Not Found", "no such disk")]);
    let url = disk_url(port);

    let err = match fetcher().open(&url) {
        Ok(_) => panic!("expected a download error"),
        Err(err) => err,
    };
    match err {
        Error::Download { url: failed, status, .. } => {
            assert_eq!(failed, url);
            assert_eq!(status, Some(404));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
