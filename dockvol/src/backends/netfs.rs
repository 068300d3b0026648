//! Network-file volume backend.
//!
//! Volumes are directories on a remote export. Each configured label maps
//! to one export mounted once under the network root and shared by all of
//! its volumes, so per-volume mount and unmount are cheap: mount resolves
//! a path, unmount is a no-op. A label may redirect to a parent label, in
//! which case its volumes nest under the parent's mount.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dockvol_shared::constants::{fs as fsconst, keys, net};
use dockvol_shared::errors::{DockvolError, DockvolResult};
use dockvol_shared::plugin::{VolumeRequest, VolumeStatus, VolumeSummary, split_label};
use walkdir::WalkDir;

use super::VolumeBackend;
use crate::fs::MountUtils;
use crate::runtime::config::{RemoteDir, RemoteDirs};
use crate::runtime::layout::MountLayout;

/// Where a label's volumes live and what backs them.
#[derive(Clone, Debug, PartialEq, Eq)]
struct MountedDir {
    /// Directory holding this label's volume subdirectories.
    vols_dir: PathBuf,
    /// Remote path to mount for the label.
    remote_path: String,
}

/// Resolve the label for a volume name, substituting the configured
/// default when the name carries none.
fn resolve_label<'a>(
    remote_dirs: &'a RemoteDirs,
    name: &str,
) -> DockvolResult<(String, &'a RemoteDir)> {
    let label = split_label(name)
        .1
        .map(str::to_string)
        .or_else(|| remote_dirs.default.clone())
        .ok_or_else(|| DockvolError::UnknownLabel(name.to_string()))?;

    let rdir = remote_dirs
        .table
        .get(&label)
        .ok_or_else(|| DockvolError::UnknownLabel(label.clone()))?;

    if rdir.fs_type != net::NFS_FSTYPE {
        return Err(DockvolError::fs_mismatch(label, rdir.fs_type.clone()));
    }

    Ok((label, rdir))
}

fn push_vol_path(path: PathBuf, segment: &str) -> PathBuf {
    if segment.is_empty() {
        path
    } else {
        path.join(segment)
    }
}

/// Compute the volume directory and remote path for a label, following a
/// parent redirect when one is configured: redirected labels mount the
/// parent's export and nest their volumes under the parent's vol path.
fn volume_dirs(
    remote_dirs: &RemoteDirs,
    layout: &MountLayout,
    label: &str,
    rdir: &RemoteDir,
) -> DockvolResult<MountedDir> {
    let mount_path = layout.label_mountpoint(label);

    match &rdir.parent {
        Some(parent) => {
            let pdir = remote_dirs
                .table
                .get(parent)
                .ok_or_else(|| DockvolError::UnknownLabel(parent.clone()))?;
            let vols_dir =
                push_vol_path(push_vol_path(mount_path, &pdir.vol_path), &rdir.vol_path);
            Ok(MountedDir {
                vols_dir,
                remote_path: pdir.path.clone(),
            })
        }
        None => Ok(MountedDir {
            vols_dir: push_vol_path(mount_path, &rdir.vol_path),
            remote_path: rdir.path.clone(),
        }),
    }
}

pub struct NetfsBackend {
    mounter: Arc<dyn MountUtils>,
    remote_dirs: RemoteDirs,
    layout: MountLayout,
}

impl NetfsBackend {
    pub fn new(mounter: Arc<dyn MountUtils>, remote_dirs: RemoteDirs, layout: MountLayout) -> Self {
        Self {
            mounter,
            remote_dirs,
            layout,
        }
    }

    /// Mount the label's export if it is not already mounted and make sure
    /// its volume directory exists. Both steps are idempotent.
    async fn ensure_label_mounted(&self, label: &str, rdir: &RemoteDir) -> DockvolResult<PathBuf> {
        let dirs = volume_dirs(&self.remote_dirs, &self.layout, label, rdir)?;
        let mount_path = self.layout.label_mountpoint(label);

        if !self.mounter.is_mounted(&mount_path) {
            self.mounter.mkdir(&mount_path, fsconst::DIR_MODE)?;
            self.mounter
                .mount_remote(
                    &mount_path,
                    &rdir.fs_type,
                    &dirs.remote_path,
                    rdir.args.as_deref(),
                )
                .await
                .map_err(|e| {
                    DockvolError::Storage(format!("remote dir not accessible for {label}: {e}"))
                })?;
        }

        self.mounter.mkdir(&dirs.vols_dir, fsconst::VOLUME_DIR_MODE)?;
        Ok(dirs.vols_dir)
    }

    /// Resolve a volume name to its directory, mounting the label's export
    /// as needed. The directory itself may not exist yet.
    async fn volume_path(&self, name: &str) -> DockvolResult<(String, PathBuf)> {
        let (label, rdir) = resolve_label(&self.remote_dirs, name)?;
        let vols_dir = self.ensure_label_mounted(&label, rdir).await?;
        let short = split_label(name).0;
        Ok((label, vols_dir.join(short)))
    }
}

#[async_trait]
impl VolumeBackend for NetfsBackend {
    async fn create(&self, req: &VolumeRequest) -> DockvolResult<()> {
        let (_, volpath) = self.volume_path(&req.name).await?;
        // Directory already existing is success, not an error: another
        // create may have raced us, and the export is shared
        // infrastructure we never tear down on failure.
        self.mounter.mkdir(&volpath, fsconst::VOLUME_DIR_MODE)
    }

    async fn remove(&self, req: &VolumeRequest) -> DockvolResult<()> {
        tracing::info!(volume = %req.name, "removing network-file volume");
        let (_, volpath) = self.volume_path(&req.name).await?;
        if !volpath.exists() {
            return Err(DockvolError::NotFound(req.name.clone()));
        }
        tokio::fs::remove_dir_all(&volpath).await.map_err(|e| {
            DockvolError::Storage(format!("failed to remove {}: {e}", volpath.display()))
        })
    }

    async fn mount(&self, name: &str, _status: &VolumeStatus) -> DockvolResult<PathBuf> {
        let (_, volpath) = self.volume_path(name).await?;
        self.mounter.mkdir(&volpath, fsconst::VOLUME_DIR_MODE)?;
        Ok(volpath)
    }

    async fn unmount(&self, name: &str) -> DockvolResult<()> {
        // The label's export stays mounted; it is shared by every volume
        // on the label.
        tracing::debug!(volume = %name, "network-file unmount is a no-op");
        Ok(())
    }

    async fn get(&self, name: &str) -> DockvolResult<VolumeStatus> {
        let (label, volpath) = self.volume_path(name).await?;

        let metadata = std::fs::symlink_metadata(&volpath)
            .map_err(|_| DockvolError::NotFound(name.to_string()))?;

        let mut size: u64 = 0;
        for entry in WalkDir::new(&volpath).into_iter().flatten() {
            if entry.file_type().is_file() {
                size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        let mut status = VolumeStatus::new();
        status.insert("path".to_string(), volpath.display().to_string().into());
        status.insert("size_bytes".to_string(), size.into());
        status.insert(keys::FSTYPE.to_string(), net::NFS_FSTYPE.into());
        status.insert(keys::LOCATION.to_string(), label.into());

        {
            use std::os::unix::fs::PermissionsExt;
            status.insert(
                "mode".to_string(),
                format!("{:o}", metadata.permissions().mode()).into(),
            );
        }

        for (key, time) in [
            ("modified", metadata.modified().ok()),
            ("accessed", metadata.accessed().ok()),
            ("created", metadata.created().ok()),
        ] {
            if let Some(time) = time.filter(|t| t.duration_since(UNIX_EPOCH).is_ok()) {
                let stamp: DateTime<Utc> = time.into();
                status.insert(key.to_string(), stamp.to_rfc3339().into());
            }
        }

        Ok(status)
    }

    async fn list(&self) -> DockvolResult<Vec<VolumeSummary>> {
        let mut volumes = Vec::new();

        for (label, rdir) in &self.remote_dirs.table {
            if rdir.fs_type != net::NFS_FSTYPE {
                continue;
            }

            let vols_dir = self.ensure_label_mounted(label, rdir).await?;

            let entries = std::fs::read_dir(&vols_dir).map_err(|e| {
                DockvolError::Storage(format!(
                    "failed to list volumes for {label}: {e}"
                ))
            })?;

            for entry in entries.flatten() {
                if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let short = entry.file_name().to_string_lossy().into_owned();
                volumes.push(VolumeSummary {
                    name: format!("{short}@{label}"),
                    mountpoint: entry.path(),
                });
            }
        }

        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    fn is_mounted(&self, name: &str) -> bool {
        // Only an explicit label counts here; an unlabeled name has not
        // been through default substitution yet.
        match split_label(name).1 {
            Some(label) => self
                .mounter
                .is_mounted(&self.layout.label_mountpoint(label)),
            None => false,
        }
    }

    fn mountpoint(&self, name: &str) -> DockvolResult<PathBuf> {
        let (label, rdir) = resolve_label(&self.remote_dirs, name)?;
        let dirs = volume_dirs(&self.remote_dirs, &self.layout, &label, rdir)?;
        Ok(dirs.vols_dir.join(split_label(name).0))
    }
}
