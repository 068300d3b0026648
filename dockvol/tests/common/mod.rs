//! Shared test harness: an in-memory host for the volume driver.
//!
//! `FakeMounter` plays the OS - it keeps a private mount table and counts
//! mkfs/mount/unmount calls instead of touching devices - while the
//! driver runs against `MockControlPlane` for the hypervisor side.
//! Directory operations hit the real filesystem under a tempdir so the
//! network-file backend's path logic is exercised for real.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use dockvol::VolumeDriver;
use dockvol::fs::{DeviceWatcher, MountEntry, MountUtils};
use dockvol::ops::{ControlPlane, DeviceHandle, MockControlPlane};
use dockvol::runtime::config::{Config, RemoteDir, RemoteDirs};
use dockvol_shared::errors::{DockvolError, DockvolResult};

/// Physical-operation call counts recorded by [`FakeMounter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FakeCounters {
    pub mkfs: u32,
    pub mount: u32,
    pub unmount: u32,
    pub remote_mount: u32,
}

#[derive(Debug, Default)]
struct FakeState {
    mounts: Vec<MountEntry>,
    counters: FakeCounters,
    fail_mkfs: Option<String>,
    fail_mount: Option<String>,
    fail_unmount: Option<String>,
    fail_remote_mount: Option<String>,
    fail_list_mounts: u32,
}

/// In-memory [`MountUtils`]: mkdir is real (under a tempdir), everything
/// device-shaped is recorded instead of executed. No watch mechanism is
/// reported, so device waits take the fixed-delay path (instant under
/// paused tokio time).
#[derive(Default)]
pub struct FakeMounter {
    state: Mutex<FakeState>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> FakeCounters {
        self.state.lock().counters
    }

    /// Pre-seed a mount-table entry, as if a previous daemon instance had
    /// mounted it.
    pub fn seed_mount(&self, mount_point: &Path, fs_type: &str, source: &str) {
        self.state.lock().mounts.push(MountEntry {
            mount_point: mount_point.to_path_buf(),
            fs_type: fs_type.to_string(),
            source: source.to_string(),
        });
    }

    pub fn mounted_paths(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .mounts
            .iter()
            .map(|m| m.mount_point.clone())
            .collect()
    }

    pub fn fail_mkfs(&self, msg: impl Into<String>) {
        self.state.lock().fail_mkfs = Some(msg.into());
    }

    pub fn fail_mount(&self, msg: impl Into<String>) {
        self.state.lock().fail_mount = Some(msg.into());
    }

    pub fn clear_fail_mount(&self) {
        self.state.lock().fail_mount = None;
    }

    pub fn fail_unmount(&self, msg: impl Into<String>) {
        self.state.lock().fail_unmount = Some(msg.into());
    }

    pub fn fail_remote_mount(&self, msg: impl Into<String>) {
        self.state.lock().fail_remote_mount = Some(msg.into());
    }

    /// Make the next `n` mount-table listings fail.
    pub fn fail_list_mounts(&self, n: u32) {
        self.state.lock().fail_list_mounts = n;
    }
}

#[async_trait]
impl MountUtils for FakeMounter {
    fn mkdir(&self, path: &Path, _mode: u32) -> DockvolResult<()> {
        std::fs::create_dir_all(path)
            .map_err(|e| DockvolError::Storage(format!("failed to create {}: {e}", path.display())))
    }

    fn mkfs_lookup(&self) -> HashMap<String, PathBuf> {
        HashMap::from([
            ("ext4".to_string(), PathBuf::from("/sbin/mkfs.ext4")),
            ("xfs".to_string(), PathBuf::from("/sbin/mkfs.xfs")),
        ])
    }

    async fn mkfs(&self, _tool: &Path, _name: &str, _device: &Path) -> DockvolResult<()> {
        let mut state = self.state.lock();
        state.counters.mkfs += 1;
        if let Some(msg) = &state.fail_mkfs {
            return Err(DockvolError::Storage(msg.clone()));
        }
        Ok(())
    }

    fn device_path(&self, handle: &DeviceHandle) -> DockvolResult<PathBuf> {
        Ok(PathBuf::from("/dev/disk/by-path").join(handle.as_str()))
    }

    fn device_wait_prep(&self) -> Option<DeviceWatcher> {
        None
    }

    async fn mount(
        &self,
        mountpoint: &Path,
        fstype: &str,
        device: &Path,
        _read_only: bool,
    ) -> DockvolResult<()> {
        let mut state = self.state.lock();
        state.counters.mount += 1;
        if let Some(msg) = &state.fail_mount {
            return Err(DockvolError::Storage(msg.clone()));
        }
        state.mounts.push(MountEntry {
            mount_point: mountpoint.to_path_buf(),
            fs_type: fstype.to_string(),
            source: device.display().to_string(),
        });
        Ok(())
    }

    async fn unmount(&self, mountpoint: &Path) -> DockvolResult<()> {
        let mut state = self.state.lock();
        state.counters.unmount += 1;
        if let Some(msg) = &state.fail_unmount {
            return Err(DockvolError::Storage(msg.clone()));
        }
        let before = state.mounts.len();
        state.mounts.retain(|m| m.mount_point != mountpoint);
        if state.mounts.len() == before {
            return Err(DockvolError::Storage(format!(
                "{} is not mounted",
                mountpoint.display()
            )));
        }
        Ok(())
    }

    async fn mount_remote(
        &self,
        mountpoint: &Path,
        fstype: &str,
        remote_path: &str,
        _args: Option<&str>,
    ) -> DockvolResult<()> {
        {
            let mut state = self.state.lock();
            state.counters.remote_mount += 1;
            if let Some(msg) = &state.fail_remote_mount {
                return Err(DockvolError::Storage(msg.clone()));
            }
            state.mounts.push(MountEntry {
                mount_point: mountpoint.to_path_buf(),
                fs_type: fstype.to_string(),
                source: remote_path.to_string(),
            });
        }
        std::fs::create_dir_all(mountpoint)
            .map_err(|e| DockvolError::Storage(format!("failed to create mountpoint: {e}")))?;
        Ok(())
    }

    fn list_mounts(&self) -> DockvolResult<Vec<MountEntry>> {
        let mut state = self.state.lock();
        if state.fail_list_mounts > 0 {
            state.fail_list_mounts -= 1;
            return Err(DockvolError::Storage("mount table unavailable".to_string()));
        }
        Ok(state.mounts.clone())
    }
}

/// Volume metadata naming a storage location, for seeding the mock
/// control plane directly.
pub fn status_with_location(location: &str) -> dockvol_shared::plugin::VolumeStatus {
    let mut status = dockvol_shared::plugin::VolumeStatus::new();
    status.insert("fstype".to_string(), "ext4".into());
    status.insert("access".to_string(), "read-write".into());
    status.insert("location".to_string(), location.into());
    status
}

/// A driver wired to the in-memory host.
pub struct Harness {
    pub driver: VolumeDriver,
    pub control: Arc<MockControlPlane>,
    pub mounter: Arc<FakeMounter>,
    _root: TempDir,
}

impl Harness {
    /// Driver with default configuration (no remote directories).
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Driver with one configured network-file label (`nfs1`, also the
    /// default label).
    pub fn with_netfs() -> Self {
        let mut config = Config::default();
        config.remote_dirs = RemoteDirs {
            default: Some("nfs1".to_string()),
            table: HashMap::from([(
                "nfs1".to_string(),
                RemoteDir {
                    fs_type: "nfs".to_string(),
                    path: "filer:/export".to_string(),
                    vol_path: "vols".to_string(),
                    parent: None,
                    args: None,
                },
            )]),
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Self {
        let root = TempDir::new().unwrap();
        let control = Arc::new(MockControlPlane::default());
        let mounter = Arc::new(FakeMounter::new());

        let control_plane: Arc<dyn ControlPlane> = control.clone();
        let mount_utils: Arc<dyn MountUtils> = mounter.clone();
        let driver = VolumeDriver::new(&config, root.path().join("mnt"), control_plane, mount_utils)
            .expect("driver construction");

        Self {
            driver,
            control,
            mounter,
            _root: root,
        }
    }

    /// Reconcile once so unmounts are trusted to do physical work.
    pub async fn ready(self) -> Self {
        self.driver.reconcile().await.expect("reconcile");
        self
    }
}
