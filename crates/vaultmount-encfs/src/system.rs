//! System-backed volume manager.
//!
//! Resolves helper binaries from configuration and pairs [`ProcessRunner`]
//! with real directory creation.

use crate::command::ProcessRunner;
use async_trait::async_trait;
use log::warn;
use std::env;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use vaultmount_core::error::{VaultmountError, VaultmountResult};
use vaultmount_core::volume::{DirectoryMaker, VolumeManager, VolumeSettings};
use vaultmount_core::VaultmountConfig;

/// Volume manager that spawns real helpers and touches the real filesystem.
pub type SystemVolumeManager = VolumeManager<ProcessRunner, HostDirectories>;

/// Recursive, idempotent `mkdir -p` on the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDirectories;

#[async_trait]
impl DirectoryMaker for HostDirectories {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }
}

/// Build a manager from configuration, resolving each helper once.
///
/// # Errors
/// Returns `VaultmountError::InvalidConfig` when a helper is configured with an
/// explicit path that does not exist. Bare program names missing from `PATH`
/// only log a warning; the failure surfaces when that helper is first used.
pub fn system_manager(config: &VaultmountConfig) -> VaultmountResult<SystemVolumeManager> {
    let mut settings = VolumeSettings::from_config(config);
    settings.encfs = resolve_program(&settings.encfs)?;
    settings.encfsctl = resolve_program(&settings.encfsctl)?;
    settings.mount_list = resolve_program(&settings.mount_list)?;
    settings.unmount = resolve_program(&settings.unmount)?;

    Ok(VolumeManager::new(ProcessRunner, HostDirectories, settings))
}

fn resolve_program(program: &OsStr) -> VaultmountResult<OsString> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        if !candidate.exists() {
            return Err(VaultmountError::InvalidConfig(format!(
                "helper binary not found at {}",
                candidate.display()
            )));
        }
        return Ok(program.to_os_string());
    }

    match find_in_path(program) {
        Some(path) => Ok(path.into_os_string()),
        None => {
            warn!(
                "{} not found in PATH; operations that need it will fail",
                candidate.display()
            );
            Ok(program.to_os_string())
        }
    }
}

fn find_in_path(binary: &OsStr) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            Some(candidate)
        } else {
            None
        }
    })
}
