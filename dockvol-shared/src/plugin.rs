//! Inbound volume-plugin protocol payloads.
//!
//! The transport layer decodes wire requests into these types and encodes
//! the results (or the error's `Display` form) back to the caller. The core
//! consumes them as plain values; nothing here knows about HTTP or sockets.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Free-form volume status map, as returned by the storage control plane
/// and augmented by the dispatcher.
pub type VolumeStatus = serde_json::Map<String, serde_json::Value>;

/// A request naming a volume, with optional driver options.
///
/// Used by Get, List, Create, Remove and Path.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub name: String,
    #[serde(default)]
    pub opts: HashMap<String, String>,
}

impl VolumeRequest {
    /// Create a request with no options.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opts: HashMap::new(),
        }
    }

    /// Add a driver option.
    pub fn with_opt(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.insert(key.into(), value.into());
        self
    }
}

/// A mount request. `mount_id` is an opaque per-mount transaction
/// identifier supplied by the caller (e.g. a container id); the matching
/// unmount carries the same id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MountRequest {
    pub name: String,
    pub mount_id: String,
}

/// An unmount request, matched to an earlier mount by `mount_id`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UnmountRequest {
    pub name: String,
    pub mount_id: String,
}

/// One entry in a List response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: PathBuf,
}

/// Full volume description returned by Get.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: PathBuf,
    pub status: VolumeStatus,
}

/// Visibility scope reported by Capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Any container on the host may see any volume mounted by this daemon.
    Global,
    /// Volumes are visible only to the requesting engine instance.
    Local,
}

/// Capabilities response payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub scope: Scope,
}

/// Split a volume name into its short name and optional storage label.
///
/// Names are either `name` or `name@label`; the label identifies which
/// storage location backs the volume.
pub fn split_label(name: &str) -> (&str, Option<&str>) {
    match name.split_once('@') {
        Some((short, label)) if !label.is_empty() => (short, Some(label)),
        Some((short, _)) => (short, None),
        None => (name, None),
    }
}
