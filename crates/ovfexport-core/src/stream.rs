//! Disk backing download.
//!
//! Each device is streamed to its destination file in small chunks. Every
//! chunk is flushed and synced before the next one is read, so bytes already
//! on disk survive a crash of the exporting process.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cookie::{transfer_headers, SessionCookie};
use crate::error::{Error, Result};
use crate::progress::{ExportPhase, ExportProgress, ProgressCallback, ProgressState};

/// Default chunk size for disk transfers (2 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Opens device transfer URLs for reading.
pub trait DeviceFetcher {
    /// Start a transfer of `url` and return the response body.
    ///
    /// Fails with [`Error::Download`] on a non-success response.
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>>;
}

/// Fetches devices over HTTP(S) with the management session cookie.
pub struct HttpFetcher {
    client: Client,
    headers: HeaderMap,
}

impl HttpFetcher {
    /// Create a fetcher that authenticates with `cookie`.
    ///
    /// `accept_invalid_certs` mirrors the management connection, whose hosts
    /// commonly present self-signed certificates.
    pub fn new(cookie: &SessionCookie, accept_invalid_certs: bool) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Option::<Duration>::None)
            .build()?;
        Ok(Self {
            client,
            headers: transfer_headers(cookie)?,
        })
    }
}

impl DeviceFetcher for HttpFetcher {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .map_err(|e| Error::download(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::download_status(
                url,
                status.as_u16(),
                status.canonical_reason().unwrap_or("request failed"),
            ));
        }

        Ok(Box::new(response))
    }
}

/// Result of streaming one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedDevice {
    /// Bytes written for this device.
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the written bytes.
    pub sha256: String,
}

/// Where a device stream reports progress.
pub struct StreamProgress<'a> {
    /// Shared state read by the heartbeat.
    pub state: &'a ProgressState,
    /// Bytes written by devices downloaded before this one.
    pub bytes_before: u64,
    /// Optional UI callback.
    pub callback: Option<&'a ProgressCallback>,
    /// Target id of the device, for the callback.
    pub device: &'a str,
}

/// Stream `reader` into a new file at `dest`.
///
/// `url` is only used for error context. The cumulative percentage is
/// published after every chunk.
pub fn stream_device(
    url: &str,
    mut reader: impl Read,
    dest: &Path,
    chunk_size: usize,
    progress: &StreamProgress<'_>,
) -> Result<StreamedDevice> {
    let mut file = File::create(dest)
        .map_err(|e| Error::download(url, format!("cannot create '{}': {e}", dest.display())))?;

    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut hasher = Sha256::new();
    let mut written = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::download(url, format!("read failed: {e}"))),
        };

        let chunk = &buf[..n];
        file.write_all(chunk)
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data())
            .map_err(|e| Error::download(url, format!("write to '{}' failed: {e}", dest.display())))?;
        hasher.update(chunk);
        written += n as u64;

        let pct = progress.state.publish(progress.bytes_before + written);
        if let Some(callback) = progress.callback {
            let mut snapshot = ExportProgress::snapshot(ExportPhase::Downloading, progress.state);
            snapshot.percent = pct;
            snapshot.current_device = Some(progress.device.to_string());
            callback(snapshot);
        }
    }

    debug!(url, bytes = written, dest = %dest.display(), "device stream finished");

    Ok(StreamedDevice {
        bytes: written,
        sha256: format!("{:x}", hasher.finalize()),
    })
}
