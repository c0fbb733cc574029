//! Lease state machine.
//!
//! Polls the lease until it is ready, downloads every eligible device exactly
//! once, and returns the resulting file manifest. Finalizing the lease is left
//! to the caller on every outcome.

use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{Lease, LeaseInfo, LeaseState};
use crate::error::{Error, Result};
use crate::manifest::ManifestEntry;
use crate::progress::{ExportPhase, ExportProgress, ProgressCallback, ProgressState};
use crate::stream::{stream_device, DeviceFetcher, StreamProgress};

/// Default interval between lease state polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Client-side phase of the lease driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    /// Waiting for the lease to become ready.
    Polling,
    /// Transferring devices.
    Downloading,
    /// All eligible devices transferred.
    Done,
    /// The transfer was abandoned because of an error.
    Aborted,
}

impl std::fmt::Display for DriverPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverPhase::Polling => write!(f, "polling"),
            DriverPhase::Downloading => write!(f, "downloading"),
            DriverPhase::Done => write!(f, "done"),
            DriverPhase::Aborted => write!(f, "aborted"),
        }
    }
}

/// Where and how the driver writes devices.
pub struct LeaseTarget<'a> {
    /// Directory receiving the disk files.
    pub dir: &'a Path,
    /// Source of device streams.
    pub fetcher: &'a dyn DeviceFetcher,
    /// Shared progress, read by the heartbeat.
    pub progress: &'a ProgressState,
    /// Optional UI callback.
    pub callback: Option<&'a ProgressCallback>,
    /// Interval between state polls.
    pub poll_interval: Duration,
    /// Chunk size for device streams.
    pub chunk_size: usize,
}

/// Drive `lease` to completion and return the manifest of downloaded files.
///
/// Fails with [`Error::Lease`] if the lease enters its error state and with
/// [`Error::Download`] if any device transfer fails.
pub fn drive_lease(lease: &dyn Lease, target: &LeaseTarget<'_>) -> Result<Vec<ManifestEntry>> {
    let mut phase = DriverPhase::Polling;
    let result = run(lease, target, &mut phase);
    let end = if result.is_ok() {
        DriverPhase::Done
    } else {
        DriverPhase::Aborted
    };
    transition(&mut phase, end);
    result
}

fn run(lease: &dyn Lease, target: &LeaseTarget<'_>, phase: &mut DriverPhase) -> Result<Vec<ManifestEntry>> {
    loop {
        match lease.state()? {
            LeaseState::Initializing => {
                debug!("lease initializing");
                if let Some(callback) = target.callback {
                    callback(ExportProgress::snapshot(ExportPhase::Initializing, target.progress));
                }
            }
            LeaseState::Ready => {
                info!("lease ready");
                transition(phase, DriverPhase::Downloading);
                let lease_info = lease.info()?;
                log_lease_info(&lease_info);
                return download_devices(&lease_info, target);
            }
            LeaseState::Error(fault) => return Err(Error::lease(fault)),
            LeaseState::Done => {
                return Err(Error::lease("lease finished before any device was transferred"))
            }
        }
        thread::sleep(target.poll_interval);
    }
}

fn download_devices(lease_info: &LeaseInfo, target: &LeaseTarget<'_>) -> Result<Vec<ManifestEntry>> {
    let mut manifest = Vec::new();
    let mut total_written = 0u64;

    for device in &lease_info.device_urls {
        let Some(target_id) = device.eligible_target() else {
            info!(
                url = %device.url,
                "no target id, device is not eligible for export (mounted ISO or image); skipping"
            );
            continue;
        };

        let dest = device_path(target.dir, target_id).ok_or_else(|| {
            Error::download(
                &device.url,
                format!("target id '{target_id}' is not a plain file name"),
            )
        })?;
        info!(url = %device.url, dest = %dest.display(), "downloading device");

        let reader = target.fetcher.open(&device.url)?;
        let streamed = stream_device(
            &device.url,
            reader,
            &dest,
            target.chunk_size,
            &StreamProgress {
                state: target.progress,
                bytes_before: total_written,
                callback: target.callback,
                device: target_id,
            },
        )?;

        total_written += streamed.bytes;
        info!(
            device = %target_id,
            bytes = streamed.bytes,
            percent = target.progress.percent(),
            "device downloaded"
        );

        manifest.push(ManifestEntry {
            device_key: device.key.clone(),
            path: target_id.to_string(),
            size: streamed.bytes,
            sha256: streamed.sha256,
        });
    }

    Ok(manifest)
}

/// `dir/target_id`, or `None` unless `target_id` is a single normal path
/// component.
fn device_path(dir: &Path, target_id: &str) -> Option<PathBuf> {
    let mut components = Path::new(target_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(dir.join(name)),
        _ => None,
    }
}

fn log_lease_info(lease_info: &LeaseInfo) {
    info!(
        timeout_secs = lease_info.timeout_secs,
        disk_capacity_kb = lease_info.total_disk_capacity_kb,
        devices = lease_info.device_urls.len(),
        "lease info"
    );
    if lease_info.device_urls.is_empty() {
        info!("no devices were found");
    }
    for (i, device) in lease_info.device_urls.iter().enumerate() {
        info!(
            number = i + 1,
            import_key = %device.import_key,
            key = %device.key,
            url = %device.url,
            size = ?device.file_size,
            ssl_thumbprint = ?device.ssl_thumbprint,
            "lease device"
        );
    }
}

fn transition(phase: &mut DriverPhase, next: DriverPhase) {
    if *phase != next {
        debug!(from = %phase, to = %next, "lease driver transition");
        *phase = next;
    }
}
