//! dockvol - storage-volume lifecycle engine for hypervisor-backed hosts.
//!
//! dockvol lets containers on a single host attach, format, mount and
//! release storage volumes that may be shared across containers. The core
//! guarantee: a volume is physically attached and mounted exactly once per
//! host no matter how many containers request it, and is unmounted and
//! detached only when the last user releases it - including across daemon
//! restarts, where in-memory bookkeeping is rebuilt from the OS mount
//! table.
//!
//! The crate is transport-agnostic. A front end decodes wire requests into
//! the [`dockvol_shared::plugin`] types and drives a [`VolumeDriver`]; the
//! remote storage control plane and the host mount primitives are consumed
//! through the [`ops::ControlPlane`] and [`fs::MountUtils`] traits.

pub mod backends;
pub mod driver;
pub mod fs;
pub mod ops;
pub mod refcount;
pub mod runtime;

use std::sync::OnceLock;

pub use dockvol_shared::errors::{DockvolError, DockvolResult};
pub use driver::VolumeDriver;

use runtime::config::LogConfig;

static LOGGING: OnceLock<()> = OnceLock::new();

/// Initialize global logging from the daemon configuration.
///
/// Builds an env-filtered fmt subscriber, writing to the configured log
/// file when one is set and to stderr otherwise. The `DOCKVOL_LOG`
/// environment variable overrides the configured level. Safe to call more
/// than once; only the first call installs a subscriber.
pub fn init_logging(config: &LogConfig) {
    let cfg = config.clone();
    LOGGING.get_or_init(move || {
        let filter = tracing_subscriber::EnvFilter::try_from_env("DOCKVOL_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

        match &cfg.path {
            Some(path) => {
                let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let file = path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "dockvold.log".to_string());
                let appender = tracing_appender::rolling::never(dir, file);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(appender)
                    .with_ansi(false)
                    .try_init();
            }
            None => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
        }
    });
}
