//! Daemon runtime support: configuration, mount-root layout and the
//! single-instance lock.

pub mod config;
pub mod layout;
pub mod lock;

pub use config::{Config, LogConfig, RemoteDir, RemoteDirs};
pub use layout::MountLayout;
pub use lock::RuntimeLock;
