//! Mount-root filesystem layout.
//!
//! All volume mountpoints live under a single mount root. Block-device
//! volumes mount at `<root>/<name>`; network-file labels mount their
//! backing export at `<root>/remote/dockvols/<label>` and expose volumes
//! as subdirectories of that mount.

use std::path::{Path, PathBuf};

use dockvol_shared::errors::{DockvolError, DockvolResult};

/// Directory structure constants
pub mod dirs {
    /// Subdirectory of the mount root holding remote-backed mounts.
    pub const REMOTE_DIR: &str = "remote";

    /// Subdirectory of `REMOTE_DIR` holding per-label volume roots.
    pub const DOCKVOLS_DIR: &str = "dockvols";
}

/// Path construction for everything under the daemon's mount root.
#[derive(Clone, Debug)]
pub struct MountLayout {
    mount_root: PathBuf,
}

impl MountLayout {
    pub fn new(mount_root: PathBuf) -> Self {
        Self { mount_root }
    }

    /// The mount root itself.
    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Mountpoint for a block-device volume: `<root>/<name>`.
    pub fn volume_mountpoint(&self, name: &str) -> PathBuf {
        self.mount_root.join(name)
    }

    /// Root of all network-file mounts: `<root>/remote/dockvols`.
    pub fn network_root(&self) -> PathBuf {
        self.mount_root.join(dirs::REMOTE_DIR).join(dirs::DOCKVOLS_DIR)
    }

    /// Mountpoint for a label's backing export:
    /// `<root>/remote/dockvols/<label>`.
    pub fn label_mountpoint(&self, label: &str) -> PathBuf {
        self.network_root().join(label)
    }

    /// Initialize the mount-root directory structure.
    pub fn prepare(&self) -> DockvolResult<()> {
        std::fs::create_dir_all(&self.mount_root)
            .map_err(|e| DockvolError::Storage(format!("failed to create mount root: {e}")))?;

        std::fs::create_dir_all(self.network_root())
            .map_err(|e| DockvolError::Storage(format!("failed to create network root: {e}")))?;

        Ok(())
    }
}
