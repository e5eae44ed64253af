//! Turns raw helper failures into typed errors.

use crate::error::{ErrorKind, VaultmountError};
use crate::runner::HelperFailure;

/// Marker FUSE helpers print when the mount point is held open.
pub const BUSY_MARKER: &str = "Device or resource busy";

/// Classify a helper failure by its stderr text. Only `Busy` and `Generic` come out of here.
pub fn classify(failure: &HelperFailure) -> ErrorKind {
    if failure.stderr.contains(BUSY_MARKER) {
        ErrorKind::Busy
    } else {
        ErrorKind::Generic
    }
}

/// Wrap `failure` in the error variant matching its classification.
pub fn into_error(failure: HelperFailure) -> VaultmountError {
    match classify(&failure) {
        ErrorKind::Busy => VaultmountError::Busy(failure),
        _ => VaultmountError::Helper(failure),
    }
}
