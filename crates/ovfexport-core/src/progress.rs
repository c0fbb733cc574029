//! Shared export progress.
//!
//! The disk streamer is the only writer of [`ProgressState`] and the lease
//! heartbeat the only reader, so plain atomics are enough.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Cumulative progress of a single export run.
#[derive(Debug)]
pub struct ProgressState {
    percent: AtomicU8,
    bytes_written: AtomicU64,
    total_bytes: u64,
}

impl ProgressState {
    /// Create progress state for an export expected to move `total_bytes`.
    pub fn new(total_bytes: u64) -> Self {
        Self {
            percent: AtomicU8::new(0),
            bytes_written: AtomicU64::new(0),
            total_bytes,
        }
    }

    /// Total bytes the export is expected to transfer.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes written across all devices so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }

    /// Current percentage, in `0..=100`.
    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Acquire)
    }

    /// Record the cumulative byte count and publish the derived percentage.
    ///
    /// The published percentage never decreases. Returns the percentage
    /// visible after the update.
    pub fn publish(&self, bytes_written: u64) -> u8 {
        self.bytes_written.store(bytes_written, Ordering::Release);
        let pct = percent_of(bytes_written, self.total_bytes);
        let previous = self.percent.fetch_max(pct, Ordering::AcqRel);
        previous.max(pct)
    }

    /// Force the percentage to 100 once the export has finished.
    pub fn finish(&self) {
        self.percent.store(100, Ordering::Release);
    }
}

/// `floor(written * 100 / total)` clamped to `0..=100`.
///
/// A zero total yields 0; completion is reported separately.
pub fn percent_of(written: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (written as u128 * 100) / total as u128;
    pct.min(100) as u8
}

/// Phase of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    /// Waiting for the server to prepare the lease.
    Initializing,
    /// Streaming disk backings.
    Downloading,
    /// Generating and writing the OVF descriptor.
    Finalizing,
    /// Export complete.
    Complete,
}

impl std::fmt::Display for ExportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportPhase::Initializing => write!(f, "Initializing"),
            ExportPhase::Downloading => write!(f, "Downloading"),
            ExportPhase::Finalizing => write!(f, "Finalizing"),
            ExportPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Progress snapshot handed to a [`ProgressCallback`].
#[derive(Debug, Clone)]
pub struct ExportProgress {
    /// Current phase of the export.
    pub phase: ExportPhase,
    /// Bytes written across all devices so far.
    pub bytes_written: u64,
    /// Total bytes expected (VM unshared storage).
    pub bytes_total: u64,
    /// Percentage reported to the lease.
    pub percent: u8,
    /// Target id of the device being downloaded, if any.
    pub current_device: Option<String>,
}

impl ExportProgress {
    /// Snapshot the shared state for the given phase.
    pub fn snapshot(phase: ExportPhase, state: &ProgressState) -> Self {
        Self {
            phase,
            bytes_written: state.bytes_written(),
            bytes_total: state.total_bytes(),
            percent: state.percent(),
            current_device: None,
        }
    }
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;
