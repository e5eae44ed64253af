//! Error taxonomy shared by every vaultmount crate.

use crate::runner::HelperFailure;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type VaultmountResult<T> = Result<T, VaultmountError>;

/// Coarse classification callers can match on without digging into payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EmptyPassword,
    PermissionDenied,
    Generic,
    Busy,
    BusyTimeout,
    Io,
    Config,
}

#[derive(Debug, Error)]
pub enum VaultmountError {
    #[error("password must not be zero length")]
    EmptyPassword,

    #[error("permission denied creating {}: {source}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to create directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Helper(HelperFailure),

    #[error("device or resource busy: {0}")]
    Busy(HelperFailure),

    #[error(
        "{} still busy after retrying once ({timeout:?} delay): {last}",
        mount_point.display()
    )]
    BusyTimeout {
        mount_point: PathBuf,
        timeout: Duration,
        last: HelperFailure,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("toml parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("toml serialise error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl VaultmountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultmountError::EmptyPassword => ErrorKind::EmptyPassword,
            VaultmountError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            VaultmountError::Helper(_) => ErrorKind::Generic,
            VaultmountError::Busy(_) => ErrorKind::Busy,
            VaultmountError::BusyTimeout { .. } => ErrorKind::BusyTimeout,
            VaultmountError::Directory { .. } | VaultmountError::Io(_) => ErrorKind::Io,
            VaultmountError::InvalidConfig(_)
            | VaultmountError::TomlDe(_)
            | VaultmountError::TomlSer(_)
            | VaultmountError::Yaml(_) => ErrorKind::Config,
        }
    }

    /// Helper diagnostics attached to the error, when a helper process was involved.
    pub fn helper_failure(&self) -> Option<&HelperFailure> {
        match self {
            VaultmountError::Helper(failure) | VaultmountError::Busy(failure) => Some(failure),
            VaultmountError::BusyTimeout { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Map a directory creation error, keeping permission problems distinguishable.
    pub(crate) fn directory(path: PathBuf, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            VaultmountError::PermissionDenied { path, source }
        } else {
            VaultmountError::Directory { path, source }
        }
    }
}
