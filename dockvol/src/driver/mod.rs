//! The volume driver: backend dispatch and the mount/unmount state
//! machines.
//!
//! [`VolumeDriver`] is what a transport front end drives. It routes each
//! request to the block or network-file backend, and wraps the physical
//! mount work in the reference-count engine so a shared volume is mounted
//! on first use and released after last use.
//!
//! The engine's lock is held across the whole decision *and* the physical
//! mount or unmount call. The physical step is slow, but correctness is
//! simple: two concurrent first-mounts of the same volume can never both
//! run, and no incr/decr pair interleaves with another for the same
//! volume.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dockvol_shared::constants::{keys, net};
use dockvol_shared::errors::{DockvolError, DockvolResult};
use dockvol_shared::plugin::{
    Capability, MountRequest, Scope, UnmountRequest, VolumeInfo, VolumeRequest, VolumeStatus,
    VolumeSummary, split_label,
};

use crate::backends::{BackendKind, BackendRegistry};
use crate::fs::MountUtils;
use crate::ops::ControlPlane;
use crate::refcount::RefCountsMap;
use crate::runtime::config::{Config, RemoteDirs};
use crate::runtime::layout::MountLayout;
use crate::runtime::lock::RuntimeLock;

/// The volume-plugin driver. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct VolumeDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    refcounts: RefCountsMap,
    registry: BackendRegistry,
    remote_dirs: RemoteDirs,
    layout: MountLayout,
    mounter: Arc<dyn MountUtils>,
    _runtime_lock: RuntimeLock,
}

impl VolumeDriver {
    /// Build a driver rooted at `mount_root`.
    ///
    /// Prepares the mount-root layout, takes the single-instance lock and
    /// constructs the backend registry. Reference counts start empty and
    /// unconfirmed; call [`reconcile`](Self::reconcile) (or
    /// [`reconcile_with_retry`](Self::reconcile_with_retry)) before
    /// trusting unmounts to do physical work.
    pub fn new(
        config: &Config,
        mount_root: PathBuf,
        control: Arc<dyn ControlPlane>,
        mounter: Arc<dyn MountUtils>,
    ) -> DockvolResult<Self> {
        let layout = MountLayout::new(mount_root);
        layout.prepare()?;

        let runtime_lock = RuntimeLock::acquire(layout.mount_root())?;

        let registry = BackendRegistry::new(control, Arc::clone(&mounter), config, &layout);

        tracing::info!(
            driver = %config.driver,
            mount_root = %layout.mount_root().display(),
            "volume driver initialized"
        );

        Ok(Self {
            inner: Arc::new(DriverInner {
                refcounts: RefCountsMap::new(),
                registry,
                remote_dirs: config.remote_dirs.clone(),
                layout,
                mounter,
                _runtime_lock: runtime_lock,
            }),
        })
    }

    /// The mount-root layout this driver serves.
    pub fn layout(&self) -> &MountLayout {
        &self.inner.layout
    }

    /// Current reference count for a volume identity.
    pub async fn get_count(&self, name: &str) -> u32 {
        self.inner.refcounts.get_count(name).await
    }

    /// Whether reference counts have been confirmed against the OS mount
    /// table since startup.
    pub fn init_success(&self) -> bool {
        self.inner.refcounts.init_success()
    }

    /// Rebuild reference counts from the OS mount table.
    pub async fn reconcile(&self) -> DockvolResult<()> {
        self.inner
            .refcounts
            .reconcile(self.inner.mounter.as_ref(), &self.inner.layout)
            .await
    }

    /// [`reconcile`](Self::reconcile) with retries, for startup.
    pub async fn reconcile_with_retry(
        &self,
        max_attempts: u32,
        backoff: Duration,
    ) -> DockvolResult<()> {
        self.inner
            .refcounts
            .reconcile_with_retry(
                self.inner.mounter.as_ref(),
                &self.inner.layout,
                max_attempts,
                backoff,
            )
            .await
    }

    /// Re-verify bookkeeping against the mount table on an interval, in a
    /// background task.
    pub fn spawn_reconciler(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = driver.reconcile().await {
                    tracing::warn!(error = %e, "periodic reconciliation failed");
                }
            }
        })
    }

    /// Backend for a volume that is not currently tracked: a label mapping
    /// to a network-file remote dir selects the netfs backend, anything
    /// else is block.
    fn kind_for_label(&self, name: &str) -> BackendKind {
        if let Some(label) = split_label(name).1 {
            if let Some(rdir) = self.inner.remote_dirs.table.get(label) {
                if rdir.fs_type.contains(net::NFS_FSTYPE) {
                    return BackendKind::Netfs;
                }
            }
        }
        BackendKind::Block
    }

    /// Backend for a volume: the one that mounted it while it stays
    /// mounted (so configuration changes cannot reroute a live volume),
    /// else by label.
    async fn resolve_kind(&self, name: &str) -> BackendKind {
        if let Some(kind) = self.inner.refcounts.lock().await.backend_kind(name) {
            return kind;
        }
        self.kind_for_label(name)
    }

    /// Resolve a request name to the fully-qualified volume identity,
    /// fetching metadata from the backend. A short name picks up the
    /// storage location reported in its metadata; a name that already
    /// carries a label is used as-is.
    async fn resolve_volume(
        &self,
        name: &str,
        kind: BackendKind,
    ) -> DockvolResult<(String, VolumeStatus)> {
        let status = self.inner.registry.get(kind).get(name).await?;
        let fname = if name.contains('@') {
            name.to_string()
        } else {
            match status.get(keys::LOCATION).and_then(|v| v.as_str()) {
                Some(location) => format!("{name}@{location}"),
                None => name.to_string(),
            }
        };
        Ok((fname, status))
    }

    /// Get info about a single volume.
    pub async fn get(&self, req: &VolumeRequest) -> DockvolResult<VolumeInfo> {
        let kind = self.resolve_kind(&req.name).await;
        let (fname, mut status) = self.resolve_volume(&req.name, kind).await?;

        let users = self.inner.refcounts.get_count(&fname).await;
        status.insert(keys::USERS.to_string(), users.into());

        Ok(VolumeInfo {
            name: req.name.clone(),
            mountpoint: self.inner.registry.get(kind).mountpoint(&fname)?,
            status,
        })
    }

    /// List volumes from every backend. A failure from either aborts the
    /// whole listing; partial results would read as volumes vanishing.
    pub async fn list(&self) -> DockvolResult<Vec<VolumeSummary>> {
        let block = self.inner.registry.get(BackendKind::Block);
        let netfs = self.inner.registry.get(BackendKind::Netfs);

        let (mut volumes, netfs_volumes) = futures::try_join!(block.list(), netfs.list())?;
        volumes.extend(netfs_volumes);
        Ok(volumes)
    }

    /// Create a volume, routing by explicit type option first, then by
    /// label, defaulting to the block backend.
    pub async fn create(&self, req: &VolumeRequest) -> DockvolResult<()> {
        if req
            .opts
            .get(keys::TYPE)
            .is_some_and(|t| t.contains(net::NFS_FSTYPE))
        {
            return self.inner.registry.get(BackendKind::Netfs).create(req).await;
        }

        if let Some(label) = split_label(&req.name).1 {
            if let Some(rdir) = self.inner.remote_dirs.table.get(label) {
                if rdir.fs_type.contains(net::NFS_FSTYPE) {
                    return self.inner.registry.get(BackendKind::Netfs).create(req).await;
                }
            }
        }

        self.inner.registry.get(BackendKind::Block).create(req).await
    }

    /// Remove a volume. Hard precondition: no active mounts - deleting an
    /// attached volume is destructive, so this is never best-effort.
    pub async fn remove(&self, req: &VolumeRequest) -> DockvolResult<()> {
        tracing::info!(volume = %req.name, "removing volume");

        let count = self.inner.refcounts.get_count(&req.name).await;
        if count != 0 {
            tracing::error!(volume = %req.name, count, "remove failed, volume is still in use");
            return Err(DockvolError::in_use(&req.name, count));
        }

        let kind = self.resolve_kind(&req.name).await;

        // A short name may be tracked under its fully-qualified identity.
        if !req.name.contains('@') {
            if let Ok((fname, _)) = self.resolve_volume(&req.name, kind).await {
                let count = self.inner.refcounts.get_count(&fname).await;
                if count != 0 {
                    tracing::error!(volume = %fname, count, "remove failed, volume is still in use");
                    return Err(DockvolError::in_use(fname, count));
                }
            }
        }

        self.inner.registry.get(kind).remove(req).await
    }

    /// Report the volume's mountpoint.
    pub async fn path(&self, req: &VolumeRequest) -> DockvolResult<PathBuf> {
        let kind = self.resolve_kind(&req.name).await;
        self.inner.registry.get(kind).mountpoint(&req.name)
    }

    /// Mount a volume for one holder. Called once per container start;
    /// only the first holder triggers a physical mount.
    pub async fn mount(&self, req: &MountRequest) -> DockvolResult<PathBuf> {
        tracing::info!(volume = %req.name, mount_id = %req.mount_id, "mounting volume");

        let inner = &self.inner;
        let mut state = inner.refcounts.lock().await;

        // From here until bookkeeping settles, a crash leaves state
        // unconfirmed; make the next reconciliation rebuild it.
        state.set_dirty();

        let kind = state
            .backend_kind(&req.name)
            .unwrap_or_else(|| self.kind_for_label(&req.name));
        let backend = inner.registry.get(kind);

        let (fname, status) = match self.resolve_volume(&req.name, kind).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(volume = %req.name, error = %e, "unable to resolve volume");
                return Err(e);
            }
        };

        let refcnt = state.incr(&fname, kind);
        tracing::debug!(volume = %fname, refcnt, "incremented refcount");

        if refcnt > 1 || backend.is_mounted(&fname) {
            tracing::info!(volume = %fname, refcnt, "already mounted, skipping physical mount");
            return backend.mountpoint(&fname);
        }

        match backend.mount(&fname, &status).await {
            Ok(mountpoint) => {
                state.record_mount_id(&req.mount_id, &fname);
                Ok(mountpoint)
            }
            Err(e) => {
                tracing::error!(volume = %fname, error = %e, "failed to mount");
                // Compensate the optimistic incr; the volume was never
                // physically mounted.
                if let Err(underflow) = state.decr(&fname) {
                    tracing::error!(
                        volume = %fname,
                        error = %underflow,
                        "refcount error while rolling back failed mount"
                    );
                }
                state.clear_dirty();
                Err(e)
            }
        }
    }

    /// Release one holder of a volume. The last release unmounts and
    /// detaches physically.
    pub async fn unmount(&self, req: &UnmountRequest) -> DockvolResult<()> {
        tracing::info!(volume = %req.name, mount_id = %req.mount_id, "unmounting volume");

        let inner = &self.inner;
        let mut state = inner.refcounts.lock().await;

        // The mount may predate this process; without an id mapping, fall
        // back to metadata resolution.
        let fname = match state.take_mount_id(&req.mount_id) {
            Some(fname) => fname,
            None => {
                let kind = state
                    .backend_kind(&req.name)
                    .unwrap_or_else(|| self.kind_for_label(&req.name));
                match self.resolve_volume(&req.name, kind).await {
                    Ok((fname, _)) => fname,
                    Err(e) => {
                        tracing::error!(volume = %req.name, error = %e, "unable to resolve volume");
                        return Err(e);
                    }
                }
            }
        };

        if !inner.refcounts.init_success() {
            // Ground truth has not been confirmed since startup. Never
            // detach something that may belong to a container started
            // before this daemon instance: drop local bookkeeping and let
            // reconciliation rebuild the truth.
            state.set_dirty();
            state.remove_entry(&fname);
            tracing::info!(
                volume = %fname,
                "unmount deferred until reference counts are reconciled"
            );
            return Ok(());
        }

        // Capture the backend before decr removes the entry at zero.
        let kind = state
            .backend_kind(&fname)
            .unwrap_or_else(|| self.kind_for_label(&fname));

        let refcnt = match state.decr(&fname) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    volume = %fname,
                    error = %e,
                    "refcount error, still attempting unmount"
                );
                0
            }
        };
        tracing::debug!(volume = %fname, refcnt, "decremented refcount");

        if refcnt >= 1 {
            tracing::info!(volume = %fname, refcnt, "still in use, skipping physical unmount");
            return Ok(());
        }

        inner.registry.get(kind).unmount(&fname).await
    }

    /// Report plugin scope: every container on the host sees every volume
    /// this daemon mounts.
    pub fn capabilities(&self) -> Capability {
        Capability {
            scope: Scope::Global,
        }
    }
}
