//! In-memory control plane.
//!
//! Stands in for the hypervisor-side storage service when developing
//! without one and throughout the test suites. Tracks volumes, their
//! attach state and per-operation call counts, and supports failure
//! injection for exercising rollback paths.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dockvol_shared::constants::{fs as fsconst, keys};
use dockvol_shared::errors::{DockvolError, DockvolResult};
use dockvol_shared::plugin::VolumeStatus;
use parking_lot::Mutex;

use super::{ControlPlane, DeviceHandle, VolumeRecord};

/// Per-operation call counts, for assertions on physical-operation
/// multiplicity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpCounters {
    pub create: u32,
    pub remove: u32,
    pub attach: u32,
    pub detach: u32,
    pub get: u32,
    pub list: u32,
}

/// Error messages to inject per operation. `None` means succeed.
#[derive(Debug, Default)]
struct FailureInjection {
    create: Option<String>,
    remove: Option<String>,
    attach: Option<String>,
    detach: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    volumes: HashMap<String, VolumeStatus>,
    attached: HashSet<String>,
    counters: OpCounters,
    failures: FailureInjection,
}

/// In-memory [`ControlPlane`] implementation.
pub struct MockControlPlane {
    state: Mutex<MockState>,
    /// Location label reported in volume metadata.
    location: String,
}

impl MockControlPlane {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            location: location.into(),
        }
    }

    /// Snapshot of the per-operation call counters.
    pub fn counters(&self) -> OpCounters {
        self.state.lock().counters
    }

    /// Whether the named volume is currently attached to this host.
    pub fn is_attached(&self, name: &str) -> bool {
        self.state.lock().attached.contains(name)
    }

    /// Names of all volumes, sorted.
    pub fn volume_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().volumes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Seed a volume without going through create.
    pub fn insert_volume(&self, name: &str, status: VolumeStatus) {
        self.state.lock().volumes.insert(name.to_string(), status);
    }

    pub fn fail_create(&self, msg: impl Into<String>) {
        self.state.lock().failures.create = Some(msg.into());
    }

    pub fn fail_attach(&self, msg: impl Into<String>) {
        self.state.lock().failures.attach = Some(msg.into());
    }

    pub fn fail_detach(&self, msg: impl Into<String>) {
        self.state.lock().failures.detach = Some(msg.into());
    }

    pub fn fail_remove(&self, msg: impl Into<String>) {
        self.state.lock().failures.remove = Some(msg.into());
    }

    fn status_for(&self, opts: &HashMap<String, String>) -> VolumeStatus {
        let mut status = VolumeStatus::new();
        let fstype = opts
            .get(keys::FSTYPE)
            .cloned()
            .unwrap_or_else(|| fsconst::FSTYPE_DEFAULT.to_string());
        status.insert(keys::FSTYPE.to_string(), fstype.into());

        let access = opts
            .get(keys::ACCESS)
            .cloned()
            .unwrap_or_else(|| "read-write".to_string());
        status.insert(keys::ACCESS.to_string(), access.into());

        status.insert(keys::LOCATION.to_string(), self.location.clone().into());
        status
    }
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new("store1")
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn create(&self, name: &str, opts: &HashMap<String, String>) -> DockvolResult<()> {
        let status = self.status_for(opts);
        let mut state = self.state.lock();
        state.counters.create += 1;
        if let Some(msg) = &state.failures.create {
            return Err(DockvolError::BackendUnavailable(msg.clone()));
        }
        state.volumes.insert(name.to_string(), status);
        Ok(())
    }

    async fn remove(&self, name: &str, _opts: &HashMap<String, String>) -> DockvolResult<()> {
        let mut state = self.state.lock();
        state.counters.remove += 1;
        if let Some(msg) = &state.failures.remove {
            return Err(DockvolError::BackendUnavailable(msg.clone()));
        }
        if state.volumes.remove(name).is_none() {
            return Err(DockvolError::NotFound(name.to_string()));
        }
        state.attached.remove(name);
        Ok(())
    }

    async fn attach(&self, name: &str) -> DockvolResult<DeviceHandle> {
        let mut state = self.state.lock();
        state.counters.attach += 1;
        if let Some(msg) = &state.failures.attach {
            return Err(DockvolError::BackendUnavailable(msg.clone()));
        }
        if !state.volumes.contains_key(name) {
            return Err(DockvolError::NotFound(name.to_string()));
        }
        state.attached.insert(name.to_string());
        Ok(DeviceHandle::new(format!("scsi-{name}")))
    }

    async fn detach(&self, name: &str) -> DockvolResult<()> {
        let mut state = self.state.lock();
        state.counters.detach += 1;
        if let Some(msg) = &state.failures.detach {
            return Err(DockvolError::BackendUnavailable(msg.clone()));
        }
        // Detach of an unattached volume is idempotent, as compensation
        // paths detach without knowing whether the attach completed.
        state.attached.remove(name);
        Ok(())
    }

    async fn get(&self, name: &str) -> DockvolResult<VolumeStatus> {
        let mut state = self.state.lock();
        state.counters.get += 1;
        state
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| DockvolError::NotFound(name.to_string()))
    }

    async fn list(&self) -> DockvolResult<Vec<VolumeRecord>> {
        let mut state = self.state.lock();
        state.counters.list += 1;
        let mut records: Vec<_> = state
            .volumes
            .keys()
            .map(|name| VolumeRecord { name: name.clone() })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}
