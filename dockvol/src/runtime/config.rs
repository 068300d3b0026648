//! Daemon configuration.
//!
//! The configuration is a JSON document naming the default backend, the
//! log destination, and the remote-directory table that maps storage
//! labels to network-file exports. A missing or malformed file is not
//! fatal: everything falls back to built-in defaults and the
//! remote-directory table is simply empty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dockvol_shared::constants::paths;
use serde::{Deserialize, Serialize};

/// Top-level daemon configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the backend used when neither options nor labels select one.
    pub driver: String,

    /// Log destination settings.
    pub log: LogConfig,

    /// Remote-directory table for network-file volumes.
    pub remote_dirs: RemoteDirs,
}

/// Log destination settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log file path. `None` logs to stderr.
    pub path: Option<PathBuf>,

    /// Default log level, overridden by the `DOCKVOL_LOG` environment
    /// variable.
    pub level: String,
}

/// The remote-directory table: which storage labels exist, what backs
/// them, and which label applies when a request names none.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteDirs {
    /// Label substituted when a volume name carries none.
    pub default: Option<String>,

    /// Label -> remote directory description.
    pub table: HashMap<String, RemoteDir>,
}

/// One configured remote directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteDir {
    /// Filesystem type of the export (e.g. "nfs").
    pub fs_type: String,

    /// Remote path to mount (e.g. "filer:/export/vols").
    pub path: String,

    /// Subdirectory under the label mountpoint where volumes live.
    pub vol_path: String,

    /// Redirect: when set, volumes for this label are nested under the
    /// named parent label's mount and vol_path.
    pub parent: Option<String>,

    /// Extra mount arguments passed through to the mount command.
    pub args: Option<String>,
}

fn default_driver() -> String {
    "block".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            log: LogConfig::default(),
            remote_dirs: RemoteDirs::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(paths::DEFAULT_LOG_PATH)),
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults.
    ///
    /// A missing file is normal (fresh install); a malformed file is
    /// logged and ignored. Neither stops the daemon.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "malformed config file, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read config file, using defaults"
                );
                Self::default()
            }
        }
    }
}
