//! vSphere management server adapter.
//!
//! Implements [`Inventory`](crate::Inventory), [`VirtualMachine`](crate::VirtualMachine)
//! and [`Lease`](crate::Lease) on top of the vim25 SOAP API, covering only the
//! calls an export needs.

pub mod client;
pub mod soap;
pub mod xml;

pub use client::{
    parse_lease_info, parse_lease_state, ConnectOptions, ServiceContent, VsphereClient, VsphereLease,
    VsphereVm, DEFAULT_API_VERSION,
};
pub use soap::MoRef;
pub use xml::Node;
