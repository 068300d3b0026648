//! Volume backends.
//!
//! Two backends exist and the set is closed: block-device volumes served
//! by the remote control plane, and network-file volumes served out of
//! configured remote directories. Both sit behind [`VolumeBackend`]; the
//! dispatcher selects one per request via [`BackendKind`] and the
//! immutable [`BackendRegistry`] built at startup.

pub mod block;
pub mod netfs;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dockvol_shared::errors::DockvolResult;
use dockvol_shared::plugin::{VolumeRequest, VolumeStatus, VolumeSummary};

use crate::fs::MountUtils;
use crate::ops::ControlPlane;
use crate::runtime::config::Config;
use crate::runtime::layout::MountLayout;

pub use block::BlockBackend;
pub use netfs::NetfsBackend;

/// Which backend serves a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Hypervisor-attached block device, formatted and mounted locally.
    Block,
    /// Directory on a mounted remote export.
    Netfs,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Block => "block",
            BackendKind::Netfs => "netfs",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability interface every backend implements.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Create a volume.
    async fn create(&self, req: &VolumeRequest) -> DockvolResult<()>;

    /// Remove a volume. Callers have already verified it has no users.
    async fn remove(&self, req: &VolumeRequest) -> DockvolResult<()>;

    /// Physically mount `name` and return its mountpoint. `status` is the
    /// volume's metadata, already fetched by the caller.
    async fn mount(&self, name: &str, status: &VolumeStatus) -> DockvolResult<PathBuf>;

    /// Physically release `name`: unmount and, where applicable, detach.
    async fn unmount(&self, name: &str) -> DockvolResult<()>;

    /// Fetch volume metadata.
    async fn get(&self, name: &str) -> DockvolResult<VolumeStatus>;

    /// List volumes this backend knows about.
    async fn list(&self) -> DockvolResult<Vec<VolumeSummary>>;

    /// Whether the volume's mountpoint is currently in the mount table.
    fn is_mounted(&self, name: &str) -> bool;

    /// Where the volume mounts (or would mount).
    fn mountpoint(&self, name: &str) -> DockvolResult<PathBuf>;
}

/// All registered backends. Built once at startup, immutable afterwards,
/// owned by the dispatcher.
pub struct BackendRegistry {
    block: BlockBackend,
    netfs: NetfsBackend,
}

impl BackendRegistry {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        mounter: Arc<dyn MountUtils>,
        config: &Config,
        layout: &MountLayout,
    ) -> Self {
        Self {
            block: BlockBackend::new(control, Arc::clone(&mounter), layout.clone()),
            netfs: NetfsBackend::new(mounter, config.remote_dirs.clone(), layout.clone()),
        }
    }

    pub fn get(&self, kind: BackendKind) -> &dyn VolumeBackend {
        match kind {
            BackendKind::Block => &self.block,
            BackendKind::Netfs => &self.netfs,
        }
    }
}
