//! Bounded wait for an attached device node to materialize.
//!
//! Attach completes on the hypervisor side before the guest kernel has
//! created the device node, so mount and mkfs must wait for it. The watch
//! is registered *before* the attach is issued - registering after would
//! race a fast-appearing device. The wait never fails the operation: on
//! timeout the caller proceeds and lets the next step report any real
//! problem. Hosts without the notification mechanism get `None` from
//! [`DeviceWatcher::new`] and callers fall back to a fixed settle delay.

use std::path::Path;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{RecursiveMode, Watcher};

/// An active watch on the device directory.
pub struct DeviceWatcher {
    rx: mpsc::Receiver<notify::Result<notify::Event>>,
    _watcher: notify::RecommendedWatcher,
}

impl DeviceWatcher {
    /// Start watching `watch_path` for new device nodes.
    ///
    /// Returns `None` when the watch cannot be established (mechanism
    /// unsupported, directory missing); callers then use a fixed delay
    /// instead.
    pub fn new(watch_path: &Path) -> Option<Self> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = match notify::recommended_watcher(tx) {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::warn!(error = %e, "device watch unavailable, will use fixed delay");
                return None;
            }
        };

        if let Err(e) = watcher.watch(watch_path, RecursiveMode::NonRecursive) {
            tracing::warn!(
                path = %watch_path.display(),
                error = %e,
                "cannot watch device directory, will use fixed delay"
            );
            return None;
        }

        Some(Self {
            rx,
            _watcher: watcher,
        })
    }

    /// Wait up to `timeout` for `device` to appear.
    ///
    /// Returns whether the device was observed. A timeout is logged and
    /// the caller proceeds regardless.
    pub async fn wait(self, device: &Path, timeout: Duration) -> bool {
        let device = device.to_path_buf();

        let result = tokio::task::spawn_blocking(move || {
            if device.exists() {
                return true;
            }

            let deadline = Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return false;
                }

                match self.rx.recv_timeout(remaining) {
                    Ok(Ok(event)) => {
                        if event.paths.iter().any(|p| p == &device) || device.exists() {
                            return true;
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "device watch event error");
                        if device.exists() {
                            return true;
                        }
                    }
                    Err(_) => return false,
                }
            }
        })
        .await;

        match result {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!("timed out waiting for device, proceeding anyway");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "device wait task failed, proceeding anyway");
                false
            }
        }
    }
}
