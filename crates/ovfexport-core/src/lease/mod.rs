//! Export lease handling.
//!
//! A lease is the server's permission to transfer a VM's disk backings. This
//! module defines the client-side view of a lease, the background heartbeat
//! that keeps it alive, and the driver that walks it through its states.

pub mod driver;
pub mod heartbeat;

pub use driver::{drive_lease, DriverPhase, LeaseTarget};
pub use heartbeat::Heartbeat;

use crate::error::Result;

/// Server-side state of an export lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    /// The server is still preparing the transfer.
    Initializing,
    /// Device URLs are available for download.
    Ready,
    /// The lease has been completed.
    Done,
    /// The lease failed; carries the server-reported fault.
    Error(String),
}

impl LeaseState {
    /// Returns true once the lease can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeaseState::Done | LeaseState::Error(_))
    }
}

impl std::fmt::Display for LeaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseState::Initializing => write!(f, "initializing"),
            LeaseState::Ready => write!(f, "ready"),
            LeaseState::Done => write!(f, "done"),
            LeaseState::Error(fault) => write!(f, "error ({fault})"),
        }
    }
}

/// One disk backing exposed by a lease.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceUrl {
    /// Device key on the VM.
    pub key: String,
    /// Key used when importing; informational for exports.
    pub import_key: String,
    /// Filename-safe disk name. `None` for ineligible devices (mounted ISOs).
    pub target_id: Option<String>,
    /// Transfer URL.
    pub url: String,
    /// Advertised size in bytes, when the server provides one.
    pub file_size: Option<u64>,
    /// SSL thumbprint of the transfer endpoint.
    pub ssl_thumbprint: Option<String>,
}

impl DeviceUrl {
    /// Target id of an eligible device, or `None` if it must be skipped.
    pub fn eligible_target(&self) -> Option<&str> {
        self.target_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Lease metadata available once the lease is ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseInfo {
    /// Seconds of inactivity before the server expires the lease.
    pub timeout_secs: u64,
    /// Advertised disk capacity; not the transfer size.
    pub total_disk_capacity_kb: u64,
    /// Disk backings in server order.
    pub device_urls: Vec<DeviceUrl>,
}

/// A lease held by the client.
///
/// Implementations must be shareable with the heartbeat thread.
pub trait Lease: Send + Sync {
    /// Read the current lease state.
    fn state(&self) -> Result<LeaseState>;

    /// Read lease metadata. Only meaningful in the `Ready` state.
    fn info(&self) -> Result<LeaseInfo>;

    /// Report transfer progress (0-100) to the server.
    fn report_progress(&self, percent: u8) -> Result<()>;

    /// Release the lease. Must be called exactly once.
    fn complete(&self) -> Result<()>;
}
