//! Volume lifecycle: create, mount, unmount, and mount-state queries.
//!
//! A [`Volume`] is a passive pair of paths. All behaviour lives on
//! [`VolumeManager`], which owns the helper runner, the directory facility, and
//! the resolved [`VolumeSettings`].

use crate::classify;
use crate::config::VaultmountConfig;
use crate::error::{VaultmountError, VaultmountResult};
use crate::platform::Platform;
use crate::retry::BusyRetry;
use crate::runner::{HelperOutput, HelperRunner, Invocation};
use async_trait::async_trait;
use log::{debug, info};
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Flags selecting encfs' non-interactive standard mode with the password read from stdin.
pub const ENCFS_MOUNT_FLAGS: [&str; 2] = ["--standard", "--stdinpass"];

/// One encrypted backing directory bound to its decrypted mount point.
///
/// Mount state is never cached here; ask [`VolumeManager::is_mounted`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Volume {
    root_path: PathBuf,
    mount_point: PathBuf,
}

impl Volume {
    /// Bind a volume for paths known out-of-band. Both paths are resolved to absolute form.
    pub fn new(
        root_path: impl AsRef<Path>,
        mount_point: impl AsRef<Path>,
    ) -> VaultmountResult<Self> {
        let root_path = root_path.as_ref();
        let mount_point = mount_point.as_ref();
        if root_path.as_os_str().is_empty() {
            return Err(VaultmountError::InvalidConfig(
                "volume root path must not be empty".into(),
            ));
        }
        if mount_point.as_os_str().is_empty() {
            return Err(VaultmountError::InvalidConfig(
                "volume mount point must not be empty".into(),
            ));
        }

        Ok(Self {
            root_path: resolve_absolute(root_path)?,
            mount_point: resolve_absolute(mount_point)?,
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }
}

/// Resolve `path` against the working directory and fold `.`/`..` lexically.
///
/// The path does not need to exist.
pub fn resolve_absolute(path: &Path) -> io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };

    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    Ok(resolved)
}

/// Idempotent recursive directory creation.
#[async_trait]
pub trait DirectoryMaker: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// Helper programs and retry policy, resolved once when the manager is built.
#[derive(Debug, Clone)]
pub struct VolumeSettings {
    pub encfs: OsString,
    pub encfsctl: OsString,
    pub mount_list: OsString,
    pub unmount: OsString,
    pub unmount_flags: Vec<OsString>,
    pub busy_retry: BusyRetry,
}

impl VolumeSettings {
    /// Defaults for `platform`, resolving every helper through `PATH`.
    pub fn for_platform(platform: Platform) -> Self {
        let strategy = platform.unmount_strategy();
        Self {
            encfs: "encfs".into(),
            encfsctl: "encfsctl".into(),
            mount_list: "mount".into(),
            unmount: strategy.program.into(),
            unmount_flags: strategy.flags.iter().map(OsString::from).collect(),
            busy_retry: BusyRetry::default(),
        }
    }

    pub fn from_config(config: &VaultmountConfig) -> Self {
        let mut settings = Self::for_platform(config.platform());
        settings.encfs = config.helpers.encfs_path.trim().into();
        settings.encfsctl = config.helpers.encfsctl_path.trim().into();
        settings.mount_list = config.helpers.mount_list_path.trim().into();
        if let Some(program) = config
            .helpers
            .unmount_path
            .as_deref()
            .map(str::trim)
            .filter(|program| !program.is_empty())
        {
            settings.unmount = program.into();
        }
        settings.busy_retry = BusyRetry::new(config.busy_timeout());
        settings
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_retry = BusyRetry::new(timeout);
        self
    }
}

/// Orchestrates the helper processes behind every volume operation.
pub struct VolumeManager<R, D> {
    runner: R,
    dirs: D,
    settings: VolumeSettings,
}

impl<R, D> VolumeManager<R, D>
where
    R: HelperRunner,
    D: DirectoryMaker,
{
    pub fn new(runner: R, dirs: D, settings: VolumeSettings) -> Self {
        Self {
            runner,
            dirs,
            settings,
        }
    }

    pub fn settings(&self) -> &VolumeSettings {
        &self.settings
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Create both directories, initialise the encrypted root, and leave it mounted.
    ///
    /// # Errors
    /// `EmptyPassword` before anything touches the host; `PermissionDenied` or
    /// `Directory` when either directory cannot be created (root first); a
    /// classified helper error when encfs fails.
    pub async fn create(
        &self,
        root_path: impl AsRef<Path>,
        mount_point: impl AsRef<Path>,
        password: &str,
    ) -> VaultmountResult<Volume> {
        if password.is_empty() {
            debug!("create rejected: password must not be zero length");
            return Err(VaultmountError::EmptyPassword);
        }

        let volume = Volume::new(root_path, mount_point)?;

        for dir in [volume.root_path(), volume.mount_point()] {
            self.dirs.create_dir_all(dir).await.map_err(|err| {
                debug!("create: unable to mkdir {}: {err}", dir.display());
                VaultmountError::directory(dir.to_path_buf(), err)
            })?;
        }

        self.mount_volume(&volume, password).await.inspect_err(|err| {
            debug!(
                "create: unable to initialise encrypted root {}: {err}",
                volume.root_path().display()
            );
        })?;

        info!(
            "created encrypted volume {} mounted at {}",
            volume.root_path().display(),
            volume.mount_point().display()
        );
        Ok(volume)
    }

    /// Mount an existing volume. Directories are not created.
    pub async fn mount(&self, volume: &Volume, password: &str) -> VaultmountResult<()> {
        if password.is_empty() {
            return Err(VaultmountError::EmptyPassword);
        }

        self.mount_volume(volume, password).await?;
        info!(
            "mounted {} at {}",
            volume.root_path().display(),
            volume.mount_point().display()
        );
        Ok(())
    }

    /// Unmount, retrying once after the configured delay if the mount point is busy.
    pub async fn unmount(&self, volume: &Volume) -> VaultmountResult<()> {
        let mut args = self.settings.unmount_flags.clone();
        args.push(volume.mount_point().into());
        let invocation = Invocation::new(self.settings.unmount.clone(), args);

        self.settings
            .busy_retry
            .run(volume.mount_point(), |attempt| {
                debug!(
                    "unmount attempt {}: {}",
                    attempt + 1,
                    invocation.display_command()
                );
                self.runner.run(&invocation)
            })
            .await?;

        info!("unmounted {}", volume.mount_point().display());
        Ok(())
    }

    /// True when the host mount listing mentions the mount point.
    ///
    /// A failing listing is an error, never `false`.
    pub async fn is_mounted(&self, volume: &Volume) -> VaultmountResult<bool> {
        let invocation =
            Invocation::new(self.settings.mount_list.clone(), Vec::<OsString>::new());
        let output = self.run_helper(&invocation).await.inspect_err(|err| {
            debug!("unable to check mount state: {err}");
        })?;

        let needle = volume.mount_point().to_string_lossy();
        Ok(output.stdout.contains(needle.as_ref()))
    }

    /// Raw `encfsctl info` report for the encrypted root.
    pub async fn info(&self, volume: &Volume) -> VaultmountResult<String> {
        let invocation = Invocation::new(
            self.settings.encfsctl.clone(),
            [OsString::from("info"), volume.root_path().into()],
        );
        let output = self.run_helper(&invocation).await?;
        Ok(output.stdout)
    }

    async fn mount_volume(&self, volume: &Volume, password: &str) -> VaultmountResult<()> {
        let mut args: Vec<OsString> = ENCFS_MOUNT_FLAGS.iter().map(OsString::from).collect();
        args.push(volume.root_path().into());
        args.push(volume.mount_point().into());

        let invocation =
            Invocation::new(self.settings.encfs.clone(), args).with_input(password.as_bytes());
        self.run_helper(&invocation).await.map(|_| ())
    }

    async fn run_helper(&self, invocation: &Invocation) -> VaultmountResult<HelperOutput> {
        debug!("running {}", invocation.display_command());
        self.runner
            .run(invocation)
            .await
            .map_err(classify::into_error)
    }
}
