//! Reference counting for shared volume mounts.
//!
//! A volume may be used by any number of containers on the host, but it is
//! physically attached and mounted at most once. [`RefCountsMap`] tracks
//! the number of active mount holders per volume so the dispatcher mounts
//! on the first user and unmounts after the last.
//!
//! The counts are rebuilt from the OS mount table after a restart
//! ([`RefCountsMap::reconcile`]): the table is the only durable record of
//! what is really mounted. Until a reconciliation has succeeded
//! (`init_success`), unmount requests must not detach anything - a volume
//! may belong to a container started before this daemon instance.
//!
//! All decision-making state lives in one structure behind one lock.
//! Callers that check a count, perform physical work, and update the count
//! hold the guard for the whole sequence; [`RefCountState`] on its own is
//! just a map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dockvol_shared::errors::{DockvolError, DockvolResult};
use tokio::sync::{Mutex, MutexGuard};

use crate::backends::BackendKind;
use crate::fs::MountUtils;
use crate::runtime::layout::MountLayout;

/// Tracked state for one mounted volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefCountEntry {
    /// Number of active mount holders. Always > 0 while the entry exists.
    pub count: u32,
    /// Backend that performed the mount; the volume keeps using it for its
    /// whole mounted lifetime.
    pub kind: BackendKind,
}

/// The lock-guarded bookkeeping: per-volume counts, the mount-id map, and
/// the dirty flag.
#[derive(Debug, Default)]
pub struct RefCountState {
    entries: HashMap<String, RefCountEntry>,
    mount_ids: HashMap<String, String>,
    dirty: bool,
}

impl RefCountState {
    /// Increment the count for `name`, creating the entry at 1 if absent.
    /// Returns the new count.
    pub fn incr(&mut self, name: &str, kind: BackendKind) -> u32 {
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert(RefCountEntry { count: 0, kind });
        entry.count += 1;
        entry.count
    }

    /// Decrement the count for `name`, removing the entry when it reaches
    /// zero. Returns the new count, or `Underflow` when the entry is
    /// absent - a bookkeeping inconsistency the caller logs.
    pub fn decr(&mut self, name: &str) -> DockvolResult<u32> {
        let Some(entry) = self.entries.get_mut(name) else {
            return Err(DockvolError::underflow(name));
        };
        entry.count -= 1;
        let count = entry.count;
        if count == 0 {
            self.entries.remove(name);
        }
        Ok(count)
    }

    /// Current count for `name`; 0 when untracked.
    pub fn get_count(&self, name: &str) -> u32 {
        self.entries.get(name).map(|e| e.count).unwrap_or(0)
    }

    /// Backend that mounted `name`, when tracked.
    pub fn backend_kind(&self, name: &str) -> Option<BackendKind> {
        self.entries.get(name).map(|e| e.kind)
    }

    /// Drop all bookkeeping for `name` without a physical unmount. Used
    /// when ground truth has not been confirmed and the request must be
    /// deferred to the next reconciliation.
    pub fn remove_entry(&mut self, name: &str) {
        self.entries.remove(name);
    }

    /// Adopt a volume discovered already mounted. Multiplicity cannot be
    /// recovered from the mount table, so adopted volumes start at 1.
    pub fn adopt(&mut self, name: &str, kind: BackendKind) {
        self.entries
            .entry(name.to_string())
            .or_insert(RefCountEntry { count: 1, kind });
    }

    /// Remember which volume a mount transaction id refers to, so the
    /// matching unmount resolves without a metadata lookup.
    pub fn record_mount_id(&mut self, mount_id: &str, name: &str) {
        self.mount_ids
            .insert(mount_id.to_string(), name.to_string());
    }

    /// Resolve and forget a mount transaction id.
    pub fn take_mount_id(&mut self, mount_id: &str) -> Option<String> {
        self.mount_ids.remove(mount_id)
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Iterate over tracked entries.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &RefCountEntry)> {
        self.entries.iter()
    }
}

/// The engine: one mutex around [`RefCountState`], plus the
/// reconciliation status flag readable without the lock.
#[derive(Debug, Default)]
pub struct RefCountsMap {
    state: Mutex<RefCountState>,
    init_success: AtomicBool,
}

impl RefCountsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the state lock. Hold the guard across the whole
    /// check-decide-update sequence, including any physical mount work the
    /// decision depends on.
    pub async fn lock(&self) -> MutexGuard<'_, RefCountState> {
        self.state.lock().await
    }

    /// Read convenience for a single count.
    pub async fn get_count(&self, name: &str) -> u32 {
        self.state.lock().await.get_count(name)
    }

    /// Whether a reconciliation pass has completed since startup.
    pub fn init_success(&self) -> bool {
        self.init_success.load(Ordering::Acquire)
    }

    /// Rebuild counts from the OS mount table under the mount root.
    ///
    /// Every volume mountpoint found mounted is adopted at count 1. Mounts
    /// under the network root are the labels' shared backing mounts, not
    /// per-volume state, and are skipped; so is anything outside the mount
    /// root (other actors own those). If a mount or unmount raced the scan
    /// (dirty flag set), the scan restarts. Tracked volumes whose
    /// mountpoint has disappeared are logged but kept - their holders are
    /// still live as far as the daemon knows.
    pub async fn reconcile(
        &self,
        mounter: &dyn MountUtils,
        layout: &MountLayout,
    ) -> DockvolResult<()> {
        loop {
            self.state.lock().await.clear_dirty();

            let mounts = mounter.list_mounts()?;

            let mut state = self.state.lock().await;
            if state.is_dirty() {
                // A mount or unmount landed between the scan and here;
                // the snapshot is stale.
                tracing::debug!("mount table changed during reconciliation, rescanning");
                continue;
            }

            let network_root = layout.network_root();
            let mut mounted_under_root = Vec::new();
            for mount in &mounts {
                if mount.mount_point.starts_with(&network_root) {
                    continue;
                }
                let Ok(rel) = mount.mount_point.strip_prefix(layout.mount_root()) else {
                    continue;
                };
                // Volume mountpoints are direct children of the root.
                let mut components = rel.components();
                let (Some(first), None) = (components.next(), components.next()) else {
                    continue;
                };
                let name = first.as_os_str().to_string_lossy().into_owned();
                mounted_under_root.push(name);
            }

            for name in &mounted_under_root {
                if state.get_count(name) == 0 {
                    tracing::info!(volume = %name, "adopting mounted volume at count 1");
                    state.adopt(name, BackendKind::Block);
                }
            }

            for (name, entry) in state.entries() {
                if entry.kind == BackendKind::Block && !mounted_under_root.contains(name) {
                    tracing::warn!(
                        volume = %name,
                        count = entry.count,
                        "tracked volume is no longer in the mount table"
                    );
                }
            }

            self.init_success.store(true, Ordering::Release);
            tracing::info!(
                adopted = mounted_under_root.len(),
                "mount table reconciliation complete"
            );
            return Ok(());
        }
    }

    /// Run [`reconcile`](Self::reconcile) until it succeeds, sleeping
    /// `backoff` between attempts, up to `max_attempts`. Startup may race
    /// the environment (mount table momentarily unreadable), so the first
    /// failures are expected noise.
    pub async fn reconcile_with_retry(
        &self,
        mounter: &dyn MountUtils,
        layout: &MountLayout,
        max_attempts: u32,
        backoff: Duration,
    ) -> DockvolResult<()> {
        let mut last_err = None;
        for attempt in 1..=max_attempts {
            match self.reconcile(mounter, layout).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconciliation failed, retrying");
                    last_err = Some(e);
                }
            }
            tokio::time::sleep(backoff).await;
        }
        Err(last_err
            .unwrap_or_else(|| DockvolError::Internal("reconciliation never attempted".into())))
    }
}
