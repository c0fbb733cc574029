//! Management server boundary.
//!
//! The export orchestrator only talks to the server through these traits; the
//! [`vsphere`](crate::vsphere) module provides the SOAP-backed implementation.

use std::sync::Arc;

use crate::error::Result;
use crate::lease::Lease;
use crate::manifest::ManifestEntry;

/// Power state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

impl PowerState {
    /// Parse the vim25 `VirtualMachinePowerState` value.
    pub fn from_vim(value: &str) -> Option<Self> {
        match value {
            "poweredOn" => Some(PowerState::PoweredOn),
            "poweredOff" => Some(PowerState::PoweredOff),
            "suspended" => Some(PowerState::Suspended),
            _ => None,
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::PoweredOn => write!(f, "poweredOn"),
            PowerState::PoweredOff => write!(f, "poweredOff"),
            PowerState::Suspended => write!(f, "suspended"),
        }
    }
}

/// A VM resolved on the management server.
pub trait VirtualMachine {
    /// Display name; also names the target directory and descriptor.
    fn name(&self) -> &str;

    /// Current power state.
    fn power_state(&self) -> PowerState;

    /// Storage used only by this VM, in bytes. The transfer size estimate.
    fn unshared_bytes(&self) -> u64;

    /// Request an export lease for this VM.
    fn export(&self) -> Result<Arc<dyn Lease>>;

    /// Ask the server to generate an OVF descriptor named `name` that
    /// references the given files.
    ///
    /// Fails with [`Error::Descriptor`](crate::Error::Descriptor) when the
    /// server reports a fault.
    fn create_descriptor(&self, name: &str, files: &[ManifestEntry]) -> Result<String>;
}

/// VM lookup on the management server.
pub trait Inventory {
    /// Resolve a VM by instance UUID. `Ok(None)` if no such VM exists.
    fn find_vm_by_uuid(&self, uuid: &str) -> Result<Option<Box<dyn VirtualMachine>>>;

    /// Find the instance UUID of the VM named `name`.
    fn find_vm_uuid_by_name(&self, name: &str) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_from_vim() {
        assert_eq!(PowerState::from_vim("poweredOff"), Some(PowerState::PoweredOff));
        assert_eq!(PowerState::from_vim("poweredOn"), Some(PowerState::PoweredOn));
        assert_eq!(PowerState::from_vim("suspended"), Some(PowerState::Suspended));
        assert_eq!(PowerState::from_vim("unknown"), None);
    }

    #[test]
    fn test_power_state_display_round_trips() {
        for state in [PowerState::PoweredOn, PowerState::PoweredOff, PowerState::Suspended] {
            assert_eq!(PowerState::from_vim(&state.to_string()), Some(state));
        }
    }
}
