//! Platform strategy table for the unmount helper.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Host family that decides which unmount helper is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Macos,
}

/// Program and leading flags used to unmount a FUSE mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmountStrategy {
    pub program: &'static str,
    pub flags: &'static [&'static str],
}

const LINUX_UNMOUNT: UnmountStrategy = UnmountStrategy {
    program: "fusermount",
    flags: &["-u"],
};

const MACOS_UNMOUNT: UnmountStrategy = UnmountStrategy {
    program: "umount",
    flags: &[],
};

impl Platform {
    /// Platform of the running build.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Macos
        } else {
            Platform::Linux
        }
    }

    pub fn unmount_strategy(self) -> &'static UnmountStrategy {
        match self {
            Platform::Linux => &LINUX_UNMOUNT,
            Platform::Macos => &MACOS_UNMOUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_uses_fusermount_with_unmount_flag() {
        let strategy = Platform::Linux.unmount_strategy();
        assert_eq!(strategy.program, "fusermount");
        assert_eq!(strategy.flags, &["-u"]);
    }

    #[test]
    fn macos_uses_plain_umount() {
        let strategy = Platform::Macos.unmount_strategy();
        assert_eq!(strategy.program, "umount");
        assert!(strategy.flags.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_platform_on_linux_build() {
        assert_eq!(Platform::current(), Platform::Linux);
    }
}
