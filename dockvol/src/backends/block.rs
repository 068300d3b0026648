//! Block-device volume backend.
//!
//! Volumes are block devices provisioned by the remote control plane.
//! Creating one attaches it to this host just long enough to lay down a
//! filesystem; mounting one attaches it and mounts the device under the
//! mount root. Every step after an attach has a compensating action so a
//! failed operation does not leave a device attached or a half-created
//! volume registered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dockvol_shared::constants::{fs as fsconst, keys};
use dockvol_shared::errors::{DockvolError, DockvolResult};
use dockvol_shared::plugin::{VolumeRequest, VolumeStatus, VolumeSummary};

use super::VolumeBackend;
use crate::fs::{DeviceWatcher, MountUtils};
use crate::ops::ControlPlane;
use crate::runtime::layout::MountLayout;

pub struct BlockBackend {
    control: Arc<dyn ControlPlane>,
    mounter: Arc<dyn MountUtils>,
    layout: MountLayout,
}

impl BlockBackend {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        mounter: Arc<dyn MountUtils>,
        layout: MountLayout,
    ) -> Self {
        Self {
            control,
            mounter,
            layout,
        }
    }

    /// Wait for the attached device to materialize. `watcher` was
    /// registered before the attach; when the watch mechanism is
    /// unavailable a fixed settle delay stands in.
    async fn await_device(&self, watcher: Option<DeviceWatcher>, device: &Path) {
        match watcher {
            Some(watcher) => {
                watcher.wait(device, fsconst::DEV_WAIT_TIMEOUT).await;
            }
            None => tokio::time::sleep(fsconst::SLEEP_BEFORE_MOUNT).await,
        }
    }

    /// Best-effort cleanup after a failed create: detach (the attach may
    /// have completed on the control-plane side even when it reported an
    /// error) and remove the half-created volume. Failures here are
    /// logged; the caller surfaces the original error.
    async fn rollback_create(&self, name: &str) {
        if let Err(e) = self.control.detach(name).await {
            tracing::warn!(volume = %name, error = %e, "detach failed during create rollback");
        }
        if let Err(e) = self.control.remove(name, &HashMap::new()).await {
            tracing::warn!(volume = %name, error = %e, "remove failed during create rollback");
        }
    }
}

#[async_trait]
impl VolumeBackend for BlockBackend {
    async fn create(&self, req: &VolumeRequest) -> DockvolResult<()> {
        let name = &req.name;

        // Cloning an existing volume: the control plane materializes the
        // clone complete with filesystem, nothing to format here.
        if req.opts.contains_key(keys::CLONE_FROM) {
            return self.control.create(name, &req.opts).await.map_err(|e| {
                tracing::error!(volume = %name, error = %e, "clone volume failed");
                e
            });
        }

        let mut opts = req.opts.clone();
        let fstype = opts
            .entry(keys::FSTYPE.to_string())
            .or_insert_with(|| fsconst::FSTYPE_DEFAULT.to_string())
            .clone();

        // Verify we can actually format before creating anything remote.
        let supported = self.mounter.mkfs_lookup();
        let Some(mkfs_tool) = supported.get(&fstype).cloned() else {
            let mut available: Vec<_> = supported.keys().cloned().collect();
            available.sort();
            return Err(DockvolError::UnsupportedFilesystem {
                fs_type: fstype,
                supported: available.join(", "),
            });
        };

        self.control.create(name, &opts).await.map_err(|e| {
            tracing::error!(volume = %name, error = %e, "create volume failed");
            e
        })?;

        tracing::info!(volume = %name, %fstype, "attaching volume and creating filesystem");

        let watcher = self.mounter.device_wait_prep();

        let handle = match self.control.attach(name).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(volume = %name, error = %e, "attach failed, removing the volume");
                self.rollback_create(name).await;
                return Err(e);
            }
        };

        let device = match self.mounter.device_path(&handle) {
            Ok(device) => device,
            Err(e) => {
                tracing::error!(
                    volume = %name,
                    error = %e,
                    "could not resolve attached device, removing the volume"
                );
                self.rollback_create(name).await;
                return Err(e);
            }
        };

        self.await_device(watcher, &device).await;

        if let Err(e) = self.mounter.mkfs(&mkfs_tool, name, &device).await {
            tracing::error!(volume = %name, error = %e, "mkfs failed, removing the volume");
            self.rollback_create(name).await;
            return Err(e);
        }

        self.control.detach(name).await.map_err(|e| {
            tracing::error!(volume = %name, error = %e, "detach after format failed");
            e
        })?;

        tracing::info!(volume = %name, %fstype, "volume and filesystem created");
        Ok(())
    }

    async fn remove(&self, req: &VolumeRequest) -> DockvolResult<()> {
        self.control.remove(&req.name, &req.opts).await.map_err(|e| {
            tracing::error!(volume = %req.name, error = %e, "failed to remove volume");
            e
        })
    }

    async fn mount(&self, name: &str, status: &VolumeStatus) -> DockvolResult<PathBuf> {
        let mountpoint = self.layout.volume_mountpoint(name);

        self.mounter
            .mkdir(&mountpoint, fsconst::DIR_MODE)
            .map_err(|e| {
                tracing::error!(
                    volume = %name,
                    dir = %mountpoint.display(),
                    "failed to make directory for volume mount"
                );
                e
            })?;

        let read_only = match status.get(keys::ACCESS).and_then(|v| v.as_str()) {
            Some(access) => access == keys::ACCESS_READ_ONLY,
            None => {
                tracing::warn!(
                    volume = %name,
                    "no access type in volume metadata, assuming read-write"
                );
                false
            }
        };

        let fstype = match status.get(keys::FSTYPE).and_then(|v| v.as_str()) {
            Some(fstype) => fstype.to_string(),
            None => {
                tracing::warn!(
                    volume = %name,
                    fallback = fsconst::FSTYPE_DEFAULT,
                    "no filesystem type in volume metadata, using the default"
                );
                fsconst::FSTYPE_DEFAULT.to_string()
            }
        };

        let watcher = self.mounter.device_wait_prep();

        let handle = self.control.attach(name).await?;
        let device = self.mounter.device_path(&handle)?;

        self.await_device(watcher, &device).await;

        // The wait may have timed out; attempt the mount anyway and let it
        // report any real failure.
        self.mounter
            .mount(&mountpoint, &fstype, &device, read_only)
            .await?;

        Ok(mountpoint)
    }

    async fn unmount(&self, name: &str) -> DockvolResult<()> {
        let mountpoint = self.layout.volume_mountpoint(name);

        if let Err(e) = self.mounter.unmount(&mountpoint).await {
            // Leaving the device attached is worse than a stale
            // mountpoint; always try the detach.
            tracing::error!(
                mountpoint = %mountpoint.display(),
                error = %e,
                "failed to unmount volume, detaching anyway"
            );
        }

        self.control.detach(name).await
    }

    async fn get(&self, name: &str) -> DockvolResult<VolumeStatus> {
        self.control.get(name).await
    }

    async fn list(&self) -> DockvolResult<Vec<VolumeSummary>> {
        let records = self.control.list().await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let mountpoint = self.layout.volume_mountpoint(&record.name);
                VolumeSummary {
                    name: record.name,
                    mountpoint,
                }
            })
            .collect())
    }

    fn is_mounted(&self, name: &str) -> bool {
        self.mounter
            .is_mounted(&self.layout.volume_mountpoint(name))
    }

    fn mountpoint(&self, name: &str) -> DockvolResult<PathBuf> {
        Ok(self.layout.volume_mountpoint(name))
    }
}
