//! Remote storage control-plane interface.
//!
//! The hypervisor-side storage service owns volume creation, deletion and
//! cross-host attach exclusivity; this daemon only drives it. The service
//! is consumed through [`ControlPlane`] - the wire client implementing it
//! lives with the transport layer. [`mock::MockControlPlane`] is an
//! in-memory implementation used for development and by the test suites.

pub mod mock;

use std::collections::HashMap;

use async_trait::async_trait;
use dockvol_shared::errors::DockvolResult;
use dockvol_shared::plugin::VolumeStatus;

pub use mock::MockControlPlane;

/// Handle the control plane returns from an attach: the device identity
/// under the host's device directory (e.g. a by-path name).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceHandle(String);

impl DeviceHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One volume known to the control plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeRecord {
    pub name: String,
}

/// Operations the remote storage control plane provides.
///
/// Each call is atomic from the daemon's point of view; a call that fails
/// partway on the remote side is compensated by the caller with explicit
/// detach/remove calls, never rolled back implicitly.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create a volume.
    async fn create(&self, name: &str, opts: &HashMap<String, String>) -> DockvolResult<()>;

    /// Remove a volume.
    async fn remove(&self, name: &str, opts: &HashMap<String, String>) -> DockvolResult<()>;

    /// Attach a volume to this host, returning its device handle.
    async fn attach(&self, name: &str) -> DockvolResult<DeviceHandle>;

    /// Detach a volume from this host.
    async fn detach(&self, name: &str) -> DockvolResult<()>;

    /// Fetch volume metadata.
    async fn get(&self, name: &str) -> DockvolResult<VolumeStatus>;

    /// List volumes known to the control plane.
    async fn list(&self) -> DockvolResult<Vec<VolumeRecord>>;
}
