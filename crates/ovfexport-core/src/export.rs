//! Export orchestrator for VM to OVF export.
//!
//! This module coordinates the full export:
//! 1. Resolve the VM and check that it is powered off
//! 2. Create `<workdir>/<vmName>`
//! 3. Acquire an export lease and start the heartbeat
//! 4. Download every eligible disk backing
//! 5. Have the server generate the OVF descriptor and write it
//! 6. Report 100% and complete the lease
//!
//! The lease is completed exactly once on every path, including failures.
//!
//! # Example
//!
//! ```no_run
//! use ovfexport_core::export::{export_vm, ExportOptions};
//! use ovfexport_core::vsphere::{ConnectOptions, VsphereClient};
//! use ovfexport_core::Inventory;
//! use std::path::Path;
//!
//! let client = VsphereClient::connect(ConnectOptions::new("vcenter.local", "admin", "secret")).unwrap();
//! let fetcher = client.device_fetcher().unwrap();
//! let uuid = client.find_vm_uuid_by_name("web01").unwrap().unwrap();
//!
//! export_vm(&client, &fetcher, &uuid, Path::new("/exports"), &ExportOptions::default(), None).unwrap();
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::error::{Error, Result};
use crate::inventory::{Inventory, PowerState, VirtualMachine};
use crate::lease::driver::DEFAULT_POLL_INTERVAL;
use crate::lease::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use crate::lease::{drive_lease, Heartbeat, Lease, LeaseTarget};
use crate::manifest::{write_checksums, ManifestEntry};
use crate::progress::{ExportPhase, ExportProgress, ProgressCallback, ProgressState};
use crate::stream::{DeviceFetcher, DEFAULT_CHUNK_SIZE};

/// Options for the export process.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Interval between lease state polls (default 2 s).
    pub poll_interval: Duration,
    /// Interval between heartbeat progress reports (default 60 s).
    pub heartbeat_interval: Duration,
    /// Size of download chunks (default 2 KB).
    pub chunk_size: usize,
    /// Write a SHA-256 `.mf` file next to the descriptor.
    pub write_manifest: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_manifest: true,
        }
    }
}

impl ExportOptions {
    /// Create export options with the given timing.
    pub fn new(poll_interval: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            poll_interval,
            heartbeat_interval,
            ..Self::default()
        }
    }

    /// Disable the `.mf` checksum file.
    pub fn without_manifest(mut self) -> Self {
        self.write_manifest = false;
        self
    }
}

/// What a successful export produced.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// Display name of the exported VM.
    pub vm_name: String,
    /// `<workdir>/<vmName>`.
    pub target_dir: PathBuf,
    /// Path of the written OVF descriptor.
    pub descriptor_path: PathBuf,
    /// Path of the `.mf` file, if one was written.
    pub checksum_path: Option<PathBuf>,
    /// Downloaded disk files in download order.
    pub files: Vec<ManifestEntry>,
}

impl ExportSummary {
    /// Total bytes downloaded across all disks.
    pub fn bytes_written(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Owns an acquired lease and its heartbeat.
///
/// Completes the lease exactly once: through [`LeaseGuard::commit`] on
/// success, or on drop for every other exit path.
struct LeaseGuard {
    lease: Arc<dyn Lease>,
    heartbeat: Heartbeat,
    progress: Arc<ProgressState>,
    finalized: bool,
}

impl LeaseGuard {
    fn acquire(vm: &dyn VirtualMachine, progress: Arc<ProgressState>, heartbeat_interval: Duration) -> Result<Self> {
        let lease = vm.export()?;
        info!(vm = vm.name(), "export lease acquired");
        let heartbeat = Heartbeat::start(Arc::clone(&lease), Arc::clone(&progress), heartbeat_interval);
        Ok(Self {
            lease,
            heartbeat,
            progress,
            finalized: false,
        })
    }

    fn lease(&self) -> &dyn Lease {
        self.lease.as_ref()
    }

    /// Stop the heartbeat, report 100% and complete the lease.
    fn commit(mut self) -> Result<()> {
        self.finalized = true;
        self.heartbeat.stop();
        self.progress.finish();
        let reported = self.lease.report_progress(100);
        let completed = self.lease.complete();
        info!("export lease completed");
        reported.and(completed)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.heartbeat.stop();
        match self.lease.complete() {
            Ok(()) => info!("export lease released after failure"),
            Err(e) => error!(error = %e, "failed to complete lease after export failure"),
        }
    }
}

/// Export a powered-off VM to `<workdir>/<vmName>/` as OVF.
///
/// # Arguments
///
/// * `inventory` - Authenticated server handle used to resolve the VM.
/// * `fetcher` - Opens device transfer URLs with the session credentials.
/// * `uuid` - Instance UUID of the VM.
/// * `workdir` - Working directory; created when missing.
/// * `options` - Timing and output options.
/// * `progress_callback` - Optional callback for progress updates.
///
/// # Errors
///
/// [`Error::NotFound`] if the VM does not exist, [`Error::Precondition`] if it
/// is not powered off, [`Error::Lease`], [`Error::Download`] or
/// [`Error::Descriptor`] for failures during the transfer. The lease, once
/// acquired, is completed before any of these are returned.
pub fn export_vm(
    inventory: &dyn Inventory,
    fetcher: &dyn DeviceFetcher,
    uuid: &str,
    workdir: &Path,
    options: &ExportOptions,
    progress_callback: Option<ProgressCallback>,
) -> Result<ExportSummary> {
    let callback = progress_callback.as_ref();
    let report = |phase: ExportPhase, state: &ProgressState| {
        if let Some(callback) = callback {
            callback(ExportProgress::snapshot(phase, state));
        }
    };

    let vm = inventory
        .find_vm_by_uuid(uuid)?
        .ok_or_else(|| Error::not_found(uuid))?;

    if vm.power_state() != PowerState::PoweredOff {
        return Err(Error::precondition(format!(
            "VM {} must be powered off (current state: {})",
            vm.name(),
            vm.power_state()
        )));
    }

    let vm_name = vm.name().to_string();
    let target_dir = prepare_target_dir(workdir, &vm_name)?;

    let progress = Arc::new(ProgressState::new(vm.unshared_bytes()));
    report(ExportPhase::Initializing, &*progress);

    let guard = LeaseGuard::acquire(vm.as_ref(), Arc::clone(&progress), options.heartbeat_interval)?;

    let files = drive_lease(
        guard.lease(),
        &LeaseTarget {
            dir: &target_dir,
            fetcher,
            progress: &progress,
            callback,
            poll_interval: options.poll_interval,
            chunk_size: options.chunk_size,
        },
    )?;

    report(ExportPhase::Finalizing, &*progress);
    info!(vm = %vm_name, files = files.len(), "creating OVF descriptor");
    let descriptor = vm.create_descriptor(&vm_name, &files)?;

    let stem = file_stem(&vm_name);
    let descriptor_name = format!("{stem}.ovf");
    let descriptor_path = target_dir.join(&descriptor_name);
    info!(path = %descriptor_path.display(), "writing OVF descriptor");
    fs::write(&descriptor_path, descriptor.as_bytes()).map_err(|e| Error::io(e, &descriptor_path))?;

    let checksum_path = if options.write_manifest {
        let path = target_dir.join(format!("{stem}.mf"));
        write_checksums(&path, &files, &descriptor_name, descriptor.as_bytes())?;
        Some(path)
    } else {
        None
    };

    guard.commit()?;
    report(ExportPhase::Complete, &*progress);

    Ok(ExportSummary {
        vm_name,
        target_dir,
        descriptor_path,
        checksum_path,
        files,
    })
}

/// Create `<workdir>/<vmName>` if needed and return it.
fn prepare_target_dir(workdir: &Path, vm_name: &str) -> Result<PathBuf> {
    info!(path = %workdir.display(), "working dir");
    let target_dir = workdir.join(file_stem(vm_name));
    info!(path = %target_dir.display(), "target dir");
    if !target_dir.is_dir() {
        info!(path = %target_dir.display(), "creating target dir");
        fs::create_dir_all(&target_dir).map_err(|e| Error::io(e, &target_dir))?;
    }
    Ok(target_dir)
}

/// VM name made safe to use as a single path component.
///
/// Separators and control characters become `_`. Names made only of dots
/// (`.`, `..`) or empty names would resolve outside the working directory,
/// so each dot becomes `_` as well.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') || c.is_control() { '_' } else { c })
        .collect();
    if stem.chars().all(|c| c == '.') {
        "_".repeat(stem.len().max(1))
    } else {
        stem
    }
}
