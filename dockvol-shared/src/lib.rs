//! dockvol shared types - common code for the core and transport layers
//!
//! This crate contains the error hierarchy, inbound plugin-protocol
//! payloads, and cross-cutting constants used by both the dockvol core and
//! the transport front ends that decode wire requests for it.

pub mod constants;
pub mod errors;
pub mod plugin;

pub use errors::{DockvolError, DockvolResult};
pub use plugin::{
    Capability, MountRequest, Scope, UnmountRequest, VolumeInfo, VolumeRequest, VolumeStatus,
    VolumeSummary, split_label,
};
