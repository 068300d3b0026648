//! Host mount and filesystem primitives.
//!
//! Everything the daemon does to the OS - directory creation, filesystem
//! creation, mount/unmount syscalls, device-node waits, mount-table reads -
//! goes through the [`MountUtils`] trait so the lifecycle code can be
//! driven against a fake host in tests. [`HostMounter`] is the real
//! implementation.

mod devwait;
mod mounttable;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dockvol_shared::constants::fs as fsconst;
use dockvol_shared::errors::{DockvolError, DockvolResult};
use nix::mount::MsFlags;
use tokio::process::Command;

pub use devwait::DeviceWatcher;
pub use mounttable::{MountEntry, parse_mountinfo};

use crate::ops::DeviceHandle;

/// Directories searched for `mkfs.*` tools in addition to `PATH`.
const MKFS_SEARCH_DIRS: &[&str] = &["/sbin", "/usr/sbin", "/bin", "/usr/bin"];

/// Mount and filesystem primitives consumed by the volume lifecycles.
#[async_trait]
pub trait MountUtils: Send + Sync {
    /// Create a directory (and parents) with the given mode. Succeeds if
    /// the directory already exists.
    fn mkdir(&self, path: &Path, mode: u32) -> DockvolResult<()>;

    /// Discover available `mkfs.*` tools, keyed by filesystem type.
    fn mkfs_lookup(&self) -> HashMap<String, PathBuf>;

    /// Create a filesystem on `device` using `tool`. `name` is the volume
    /// name, for logging.
    async fn mkfs(&self, tool: &Path, name: &str, device: &Path) -> DockvolResult<()>;

    /// Resolve a control-plane device handle to the host device path.
    fn device_path(&self, handle: &DeviceHandle) -> DockvolResult<PathBuf>;

    /// Register a watch for device nodes materializing, or `None` when the
    /// host does not support the notification mechanism. Must be called
    /// before the attach is issued so a fast-appearing device is not
    /// missed.
    fn device_wait_prep(&self) -> Option<DeviceWatcher>;

    /// Mount `device` at `mountpoint`.
    async fn mount(
        &self,
        mountpoint: &Path,
        fstype: &str,
        device: &Path,
        read_only: bool,
    ) -> DockvolResult<()>;

    /// Unmount `mountpoint`.
    async fn unmount(&self, mountpoint: &Path) -> DockvolResult<()>;

    /// Mount a remote export at `mountpoint`.
    async fn mount_remote(
        &self,
        mountpoint: &Path,
        fstype: &str,
        remote_path: &str,
        args: Option<&str>,
    ) -> DockvolResult<()>;

    /// Current OS mount table.
    fn list_mounts(&self) -> DockvolResult<Vec<MountEntry>>;

    /// Whether `mountpoint` appears in the current mount table.
    fn is_mounted(&self, mountpoint: &Path) -> bool {
        self.list_mounts()
            .map(|mounts| mounts.iter().any(|m| m.mount_point == mountpoint))
            .unwrap_or(false)
    }
}

/// [`MountUtils`] backed by the real host: mount syscalls via `nix`,
/// `mkfs.*` and remote mounts via commands, `/proc/self/mountinfo` for the
/// mount table.
pub struct HostMounter;

impl HostMounter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HostMounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MountUtils for HostMounter {
    fn mkdir(&self, path: &Path, mode: u32) -> DockvolResult<()> {
        use std::os::unix::fs::PermissionsExt;

        std::fs::create_dir_all(path).map_err(|e| {
            DockvolError::Storage(format!("failed to create {}: {e}", path.display()))
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            DockvolError::Storage(format!("failed to chmod {}: {e}", path.display()))
        })?;

        Ok(())
    }

    fn mkfs_lookup(&self) -> HashMap<String, PathBuf> {
        let mut tools = HashMap::new();

        let path_dirs = std::env::var("PATH").unwrap_or_default();
        let dirs = path_dirs
            .split(':')
            .map(PathBuf::from)
            .chain(MKFS_SEARCH_DIRS.iter().map(PathBuf::from));

        for dir in dirs {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let Some(fstype) = file_name.to_string_lossy().strip_prefix("mkfs.").map(String::from)
                else {
                    continue;
                };
                if !entry.path().is_file() {
                    continue;
                }
                tools.entry(fstype).or_insert_with(|| entry.path());
            }
        }

        tools
    }

    async fn mkfs(&self, tool: &Path, name: &str, device: &Path) -> DockvolResult<()> {
        tracing::info!(
            volume = %name,
            device = %device.display(),
            tool = %tool.display(),
            "creating filesystem"
        );

        let mut cmd = Command::new(tool);
        if let Some(flag) = force_flag(tool) {
            cmd.arg(flag);
        }
        let output = cmd.arg(device).output().await.map_err(|e| {
            DockvolError::Storage(format!("failed to run {}: {e}", tool.display()))
        })?;

        if !output.status.success() {
            return Err(DockvolError::Storage(format!(
                "failed to create filesystem on {}: {}",
                device.display(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(())
    }

    fn device_path(&self, handle: &DeviceHandle) -> DockvolResult<PathBuf> {
        if handle.as_str().is_empty() {
            return Err(DockvolError::Storage(
                "control plane returned an empty device handle".to_string(),
            ));
        }
        Ok(PathBuf::from(fsconst::WATCH_PATH).join(handle.as_str()))
    }

    fn device_wait_prep(&self) -> Option<DeviceWatcher> {
        DeviceWatcher::new(Path::new(fsconst::WATCH_PATH))
    }

    async fn mount(
        &self,
        mountpoint: &Path,
        fstype: &str,
        device: &Path,
        read_only: bool,
    ) -> DockvolResult<()> {
        tracing::info!(
            device = %device.display(),
            mountpoint = %mountpoint.display(),
            fstype,
            read_only,
            "mounting block device"
        );

        let mut flags = MsFlags::empty();
        if read_only {
            flags |= MsFlags::MS_RDONLY;
        }

        nix::mount::mount(
            Some(device),
            mountpoint,
            Some(fstype),
            flags,
            None::<&str>,
        )
        .map_err(|e| {
            DockvolError::Storage(format!(
                "failed to mount {} at {}: {e}",
                device.display(),
                mountpoint.display()
            ))
        })
    }

    async fn unmount(&self, mountpoint: &Path) -> DockvolResult<()> {
        tracing::info!(mountpoint = %mountpoint.display(), "unmounting");

        nix::mount::umount(mountpoint).map_err(|e| {
            DockvolError::Storage(format!("failed to unmount {}: {e}", mountpoint.display()))
        })
    }

    async fn mount_remote(
        &self,
        mountpoint: &Path,
        fstype: &str,
        remote_path: &str,
        args: Option<&str>,
    ) -> DockvolResult<()> {
        tracing::info!(
            remote = %remote_path,
            mountpoint = %mountpoint.display(),
            fstype,
            "mounting remote directory"
        );

        let mut cmd = Command::new("mount");
        cmd.arg("-t").arg(fstype);
        if let Some(args) = args {
            for arg in args.split_whitespace() {
                cmd.arg(arg);
            }
        }
        let output = cmd
            .arg(remote_path)
            .arg(mountpoint)
            .output()
            .await
            .map_err(|e| DockvolError::Storage(format!("failed to run mount: {e}")))?;

        if !output.status.success() {
            return Err(DockvolError::Storage(format!(
                "failed to mount {remote_path} at {}: {}",
                mountpoint.display(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(())
    }

    fn list_mounts(&self) -> DockvolResult<Vec<MountEntry>> {
        let contents = std::fs::read_to_string("/proc/self/mountinfo")
            .map_err(|e| DockvolError::Storage(format!("failed to read mount table: {e}")))?;
        parse_mountinfo(&contents)
    }
}

/// Force flag for the given mkfs tool, where one exists. ext-family tools
/// prompt without `-F`; xfs refuses to overwrite without `-f`.
fn force_flag(tool: &Path) -> Option<&'static str> {
    let name = tool.file_name()?.to_string_lossy().into_owned();
    let fstype = name.strip_prefix("mkfs.")?.to_string();
    if fstype.starts_with("ext") {
        Some("-F")
    } else if fstype == "xfs" || fstype == "btrfs" {
        Some("-f")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_flag() {
        assert_eq!(force_flag(Path::new("/sbin/mkfs.ext4")), Some("-F"));
        assert_eq!(force_flag(Path::new("/sbin/mkfs.ext2")), Some("-F"));
        assert_eq!(force_flag(Path::new("/sbin/mkfs.xfs")), Some("-f"));
        assert_eq!(force_flag(Path::new("/sbin/mkfs.vfat")), None);
        assert_eq!(force_flag(Path::new("/sbin/fsck")), None);
    }

    #[test]
    fn test_device_path() {
        let mounter = HostMounter::new();
        let path = mounter
            .device_path(&DeviceHandle::new("scsi-0:0:1:0"))
            .unwrap();
        assert_eq!(path, PathBuf::from("/dev/disk/by-path/scsi-0:0:1:0"));

        assert!(mounter.device_path(&DeviceHandle::new("")).is_err());
    }

    #[test]
    fn test_mkfs_lookup_finds_tools_in_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("mkfs.testfs");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Prepend the temp dir so the scan sees it regardless of host state.
        let old_path = std::env::var("PATH").unwrap_or_default();
        unsafe {
            std::env::set_var("PATH", format!("{}:{old_path}", dir.path().display()));
        }

        let tools = HostMounter::new().mkfs_lookup();
        assert_eq!(tools.get("testfs"), Some(&tool));

        unsafe {
            std::env::set_var("PATH", old_path);
        }
    }
}
