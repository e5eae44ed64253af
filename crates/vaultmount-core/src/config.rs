//! Configuration model and helpers used by vaultmount binaries.

use crate::error::{VaultmountError, VaultmountResult};
use crate::platform::Platform;
use directories_next::ProjectDirs;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vaultmount.toml";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 1_000;
pub(crate) const BUSY_TIMEOUT_ENV: &str = "VAULTMOUNT_BUSY_TIMEOUT_MS";
const BOOTSTRAP_FILE_NAME: &str = "vaultmount.toml";
const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "Vaultmount";
const APP_NAME: &str = "vaultmount";
const BUSY_TIMEOUT_MAX_MS: u64 = 60_000;
#[cfg(unix)]
const SEEDED_MODE: u32 = 0o644;

const BOOTSTRAP_TEMPLATE: &str = "\
# Auto-generated vaultmount configuration.

[helpers]
# Programs are resolved through PATH unless an absolute path is given.
encfs_path = \"encfs\"
encfsctl_path = \"encfsctl\"
mount_list_path = \"mount\"
# unmount_path = \"fusermount\"
# platform = \"linux\"

[retry]
# Delay before the single retry of an unmount that reported a busy mount point.
busy_timeout_ms = 1000
";

/// Helper program locations. Unset values fall back to the platform defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HelperCfg {
    #[serde(default = "default_encfs_path")]
    pub encfs_path: String,

    #[serde(default = "default_encfsctl_path")]
    pub encfsctl_path: String,

    #[serde(default = "default_mount_list_path")]
    pub mount_list_path: String,

    /// Override for the unmount program; flags still follow the platform.
    #[serde(default)]
    pub unmount_path: Option<String>,

    #[serde(default)]
    pub platform: Option<Platform>,
}

fn default_encfs_path() -> String {
    "encfs".to_string()
}

fn default_encfsctl_path() -> String {
    "encfsctl".to_string()
}

fn default_mount_list_path() -> String {
    "mount".to_string()
}

impl Default for HelperCfg {
    fn default() -> Self {
        Self {
            encfs_path: default_encfs_path(),
            encfsctl_path: default_encfsctl_path(),
            mount_list_path: default_mount_list_path(),
            unmount_path: None,
            platform: None,
        }
    }
}

/// Busy-unmount retry knobs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetryCfg {
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VaultmountConfig {
    #[serde(default)]
    pub helpers: HelperCfg,

    #[serde(default)]
    pub retry: RetryCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

pub fn bootstrap_template() -> &'static str {
    BOOTSTRAP_TEMPLATE
}

impl VaultmountConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Resolve the per-user configuration path used for bootstrapping.
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(BOOTSTRAP_FILE_NAME))
    }

    /// Load configuration, seeding the starter template when the file is missing.
    ///
    /// Only the system-wide default falls back to the per-user location, and
    /// only when `/etc` cannot be written (an unprivileged operator).
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> VaultmountResult<Self> {
        let requested = path.as_ref();
        let seed_err = match seed_config(requested) {
            Ok(()) => return Self::load(requested),
            Err(err) => err,
        };

        if requested != Self::default_path() {
            return Err(VaultmountError::InvalidConfig(format!(
                "cannot write starter helper configuration to {}: {seed_err}",
                requested.display()
            )));
        }

        let fallback = Self::user_config_path().ok_or_else(|| {
            VaultmountError::InvalidConfig(format!(
                "{DEFAULT_CONFIG_PATH} is not writable ({seed_err}) and no per-user \
                 configuration directory is known"
            ))
        })?;
        seed_config(&fallback).map_err(|err| {
            VaultmountError::InvalidConfig(format!(
                "cannot write starter helper configuration to {}: {err}",
                fallback.display()
            ))
        })?;

        warn!(
            "{DEFAULT_CONFIG_PATH} is not writable ({seed_err}); helper programs are read from {}",
            fallback.display()
        );
        Self::load(&fallback)
    }

    /// Read a config file from disk and detect its format by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> VaultmountResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
        );
        let mut cfg = if is_yaml {
            serde_yaml::from_str::<Self>(&contents)?
        } else {
            toml::from_str::<Self>(&contents)?
        };

        warn_if_writable_by_others(path);
        cfg.path = path.to_path_buf();
        cfg.format = if is_yaml {
            ConfigFormat::Yaml
        } else {
            ConfigFormat::Toml
        };

        let issues = cfg.validate();
        if !issues.is_empty() {
            return Err(VaultmountError::InvalidConfig(issues.join("; ")));
        }

        Ok(cfg)
    }

    /// Perform a best-effort validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for (key, value) in [
            ("helpers.encfs_path", Some(&self.helpers.encfs_path)),
            ("helpers.encfsctl_path", Some(&self.helpers.encfsctl_path)),
            ("helpers.mount_list_path", Some(&self.helpers.mount_list_path)),
            ("helpers.unmount_path", self.helpers.unmount_path.as_ref()),
        ] {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    issues.push(format!("{key} must not be empty"));
                }
            }
        }

        if self.retry.busy_timeout_ms > BUSY_TIMEOUT_MAX_MS {
            issues.push(format!(
                "retry.busy_timeout_ms must not exceed {BUSY_TIMEOUT_MAX_MS} (got {})",
                self.retry.busy_timeout_ms
            ));
        }

        issues
    }

    /// Platform whose unmount strategy applies, honouring the configured override.
    pub fn platform(&self) -> Platform {
        self.helpers.platform.unwrap_or_else(Platform::current)
    }

    /// Delay before retrying a busy unmount.
    ///
    /// `VAULTMOUNT_BUSY_TIMEOUT_MS` wins over the file when it parses and stays
    /// within the same cap `validate` enforces; otherwise it is ignored with a warning.
    pub fn busy_timeout(&self) -> Duration {
        let file_value = Duration::from_millis(self.retry.busy_timeout_ms);
        let Ok(raw) = env::var(BUSY_TIMEOUT_ENV) else {
            return file_value;
        };

        match raw.trim().parse::<u64>() {
            Ok(ms) if ms <= BUSY_TIMEOUT_MAX_MS => Duration::from_millis(ms),
            Ok(ms) => {
                warn!(
                    "ignoring {BUSY_TIMEOUT_ENV}={ms}: above the {BUSY_TIMEOUT_MAX_MS}ms limit; \
                     using {}ms",
                    self.retry.busy_timeout_ms
                );
                file_value
            }
            Err(err) => {
                warn!(
                    "ignoring {BUSY_TIMEOUT_ENV}={raw:?}: {err}; using {}ms",
                    self.retry.busy_timeout_ms
                );
                file_value
            }
        }
    }

    /// Persist the configuration back to its original on-disk format.
    pub fn save(&self) -> VaultmountResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

/// Write the starter template to `path` unless a file is already there.
///
/// The config names the binaries that receive volume passwords on stdin, so it
/// is created owner-writable only.
fn seed_config(path: &Path) -> io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = match OpenOptions::new().create_new(true).write(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(()),
        Err(err) => return Err(err),
    };
    file.write_all(BOOTSTRAP_TEMPLATE.as_bytes())?;
    file.flush()?;
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(SEEDED_MODE))?;
    }

    info!("wrote starter helper configuration to {}", path.display());
    Ok(())
}

/// Permission bits letting someone other than the owner rewrite `path`.
#[cfg(unix)]
fn foreign_write_bits(path: &Path) -> Option<u32> {
    let mode = fs::metadata(path).ok()?.permissions().mode();
    let bits = mode & 0o022;
    (bits != 0).then_some(bits)
}

#[cfg(unix)]
fn warn_if_writable_by_others(path: &Path) {
    if let Some(bits) = foreign_write_bits(path) {
        warn!(
            "{} is writable by group or others (mode bits {bits:03o}); \
             anyone who can edit it chooses which encfs binary receives passwords",
            path.display()
        );
    }
}

#[cfg(not(unix))]
fn warn_if_writable_by_others(_path: &Path) {}
