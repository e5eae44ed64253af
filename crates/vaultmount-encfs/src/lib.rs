#![forbid(unsafe_code)]

//! Host-backed volume operations.
//!
//! `command` spawns helpers through tokio and reports one outcome per call;
//! `system` wires it to real directory creation and resolves helper binaries
//! from configuration.

mod command;
mod system;

pub use command::ProcessRunner;
pub use system::{system_manager, HostDirectories, SystemVolumeManager};
