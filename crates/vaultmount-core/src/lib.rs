#![forbid(unsafe_code)]

//! Core building blocks shared by vaultmount binaries.
//!
//! Volume lifecycle orchestration, helper failure classification, the busy
//! unmount retry policy, and configuration live here. Host integration (real
//! process spawning, directory creation) lives in `vaultmount-encfs`.

pub mod classify;
pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod retry;
pub mod runner;
pub mod volume;

pub use classify::{classify, BUSY_MARKER};
pub use config::{ConfigFormat, HelperCfg, RetryCfg, VaultmountConfig};
pub use error::{ErrorKind, VaultmountError, VaultmountResult};
pub use platform::{Platform, UnmountStrategy};
pub use retry::BusyRetry;
pub use runner::{HelperFailure, HelperOutput, HelperRunner, Invocation};
pub use volume::{DirectoryMaker, Volume, VolumeManager, VolumeSettings};
