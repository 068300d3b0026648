//! Constants shared between the dockvol core and its transport front ends.

/// Filesystem and device handling constants.
pub mod fs {
    use std::time::Duration;

    /// Filesystem type used when a request or volume metadata does not
    /// specify one.
    pub const FSTYPE_DEFAULT: &str = "ext4";

    /// Directory watched for device nodes materializing after an attach.
    pub const WATCH_PATH: &str = "/dev/disk/by-path";

    /// Upper bound on the event-driven wait for a device node to appear.
    /// On expiry the caller proceeds and lets the next step report failure.
    pub const DEV_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Fixed settle delay used when the watch mechanism is unavailable.
    pub const SLEEP_BEFORE_MOUNT: Duration = Duration::from_secs(1);

    /// Mode for mountpoint directories created by the daemon.
    pub const DIR_MODE: u32 = 0o755;

    /// Mode for volume directories created on network-file backends.
    pub const VOLUME_DIR_MODE: u32 = 0o775;
}

/// Network-file backend constants.
pub mod net {
    /// Filesystem type served by the network-file backend.
    pub const NFS_FSTYPE: &str = "nfs";
}

/// Default host paths.
pub mod paths {
    /// Default location of the daemon configuration file.
    pub const DEFAULT_CONFIG_PATH: &str = "/etc/dockvol.conf";

    /// Default location of the daemon log file.
    pub const DEFAULT_LOG_PATH: &str = "/var/log/dockvold.log";

    /// Default root under which volumes are mounted.
    pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/dockvol";
}

/// Request option and volume metadata keys.
///
/// These keys appear in create-request option maps and in the status maps
/// returned by the storage control plane. They must stay stable across the
/// host-transport boundary.
pub mod keys {
    /// Create option selecting a volume kind (e.g. "nfs").
    pub const TYPE: &str = "type";

    /// Create option and metadata key for the filesystem type.
    pub const FSTYPE: &str = "fstype";

    /// Create option naming an existing volume to clone from.
    pub const CLONE_FROM: &str = "clone-from";

    /// Metadata key for the volume access mode.
    pub const ACCESS: &str = "access";

    /// `ACCESS` value marking a volume read-only.
    pub const ACCESS_READ_ONLY: &str = "read-only";

    /// Metadata key for the storage location label backing a volume.
    pub const LOCATION: &str = "location";

    /// Status key reporting the number of active mount holders.
    pub const USERS: &str = "users";
}
