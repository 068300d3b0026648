//! Single-instance lock for the mount root.
//!
//! The daemon assumes it is the only instance managing a host's mounts;
//! two daemons reconciling and unmounting against the same root would
//! fight each other. An flock on a file under the mount root enforces
//! the assumption and is released automatically if the process dies.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use dockvol_shared::errors::{DockvolError, DockvolResult};

const LOCK_FILE: &str = ".dockvold.lock";

/// A guard holding an exclusive lock on the mount root.
///
/// The lock is released when this guard is dropped, or when the process
/// exits or crashes.
#[derive(Debug)]
pub struct RuntimeLock {
    #[allow(dead_code)] // Held for lifetime, not directly accessed
    file: File,
    path: PathBuf,
}

impl RuntimeLock {
    /// Attempt to acquire the exclusive lock for `mount_root`.
    ///
    /// Fails if another daemon instance already holds it.
    pub fn acquire(mount_root: &Path) -> DockvolResult<Self> {
        std::fs::create_dir_all(mount_root)
            .map_err(|e| DockvolError::Storage(format!("failed to create mount root: {e}")))?;

        let lock_path = mount_root.join(LOCK_FILE);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| DockvolError::Storage(format!("failed to open lock file: {e}")))?;

        {
            use std::os::unix::io::AsRawFd;

            let fd = file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Err(DockvolError::Internal(format!(
                        "another dockvol daemon is already managing mount root {}; \
                         only one instance may own a host's mounts",
                        mount_root.display()
                    )));
                }
                return Err(DockvolError::Storage(format!(
                    "failed to acquire mount-root lock: {err}"
                )));
            }
        }

        tracing::debug!(lock_path = %lock_path.display(), "acquired mount-root lock");

        Ok(RuntimeLock {
            file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        // The OS releases the lock when the file closes; unlock explicitly
        // so the release point is deterministic.
        {
            use std::os::unix::io::AsRawFd;
            let fd = self.file.as_raw_fd();
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
        }

        tracing::debug!(lock_path = %self.path.display(), "released mount-root lock");
    }
}
