//! ovfexport Core Library
//!
//! This crate exports powered-off vSphere VMs to a local directory as OVF: an
//! `.ovf` descriptor plus one disk image per eligible disk backing.
//!
//! # Overview
//!
//! The export acquires an `HttpNfcLease` from the server, waits for it to
//! become ready, streams each disk over HTTP while a background heartbeat
//! reports progress, has the server generate the descriptor, and completes the
//! lease exactly once. The main entry point is [`export_vm`].
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`cookie`] - Session cookie to HTTP header adapter
//! - [`progress`] - Shared progress state and callbacks
//! - [`lease`] - Lease types, heartbeat and state machine
//! - [`stream`] - Disk download
//! - [`manifest`] - File manifest and SHA-256 `.mf` output
//! - [`inventory`] - Management server traits
//! - [`export`] - Export orchestrator
//! - [`vsphere`] - vim25 SOAP implementation of the server traits
//!
//! # Quick Start
//!
//! ```no_run
//! use ovfexport_core::vsphere::{ConnectOptions, VsphereClient};
//! use ovfexport_core::{export_vm, ExportOptions, Inventory};
//! use std::path::Path;
//!
//! let client = VsphereClient::connect(ConnectOptions::new("vcenter.local", "admin", "secret")).unwrap();
//! let fetcher = client.device_fetcher().unwrap();
//! let uuid = client.find_vm_uuid_by_name("web01").unwrap().unwrap();
//!
//! export_vm(&client, &fetcher, &uuid, Path::new("/exports"), &ExportOptions::default(), None).unwrap();
//! ```

pub mod cookie;
pub mod error;
pub mod export;
pub mod inventory;
pub mod lease;
pub mod manifest;
pub mod progress;
pub mod stream;
pub mod vsphere;

pub use error::{Error, Result};

// Re-export main export functionality for convenience
pub use export::{export_vm, ExportOptions, ExportSummary};
pub use inventory::{Inventory, PowerState, VirtualMachine};
pub use lease::{DeviceUrl, Lease, LeaseInfo, LeaseState};
pub use manifest::ManifestEntry;
pub use progress::{ExportPhase, ExportProgress, ProgressCallback, ProgressState};
pub use stream::{DeviceFetcher, HttpFetcher, DEFAULT_CHUNK_SIZE};
