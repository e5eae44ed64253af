#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};
use vaultmount_core::config::{HelperCfg, RetryCfg, VaultmountConfig};
use vaultmount_core::error::{ErrorKind, VaultmountError, VaultmountResult};
use vaultmount_core::platform::Platform;
use vaultmount_core::Volume;
use vaultmount_encfs::{system_manager, SystemVolumeManager};

fn write_executable(path: &Path, contents: &str) -> VaultmountResult<()> {
    fs::write(path, contents)?;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// Fake `encfs`/`fusermount`/`mount`/`encfsctl` sharing a mount table file.
struct FakeHost {
    dir: TempDir,
    bin: PathBuf,
    mounted: PathBuf,
    log: PathBuf,
    busy: PathBuf,
}

impl FakeHost {
    fn new() -> VaultmountResult<Self> {
        let dir = tempdir()?;
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin)?;
        let mounted = dir.path().join("mounted");
        let log = dir.path().join("helpers.log");
        let busy = dir.path().join("busy-remaining");

        write_executable(
            &bin.join("encfs"),
            &format!(
                r#"#!/bin/sh
STATE="{state}"
LOG="{log}"
if [ "$1" != "--standard" ] || [ "$2" != "--stdinpass" ]; then
  echo "encfs: unexpected flags $*" >&2
  exit 2
fi
PASS=$(cat)
ROOT="$3"
MNT="$4"
echo "encfs $ROOT $MNT" >> "$LOG"
if [ -z "$PASS" ]; then
  echo "encfs: no password supplied" >&2
  exit 1
fi
if [ ! -d "$ROOT" ] || [ ! -d "$MNT" ]; then
  echo "encfs: missing directory" >&2
  exit 1
fi
if [ -f "$ROOT/.encfs6.xml" ]; then
  if [ "$(cat "$ROOT/.encfs6.xml")" != "$PASS" ]; then
    echo "Error decoding volume key, password incorrect" >&2
    exit 1
  fi
else
  printf '%s' "$PASS" > "$ROOT/.encfs6.xml"
fi
echo "$MNT" >> "$STATE"
exit 0
"#,
                state = mounted.display(),
                log = log.display()
            ),
        )?;

        write_executable(
            &bin.join("fusermount"),
            &format!(
                r#"#!/bin/sh
STATE="{state}"
LOG="{log}"
BUSY="{busy}"
echo "fusermount $*" >> "$LOG"
if [ "$1" != "-u" ]; then
  echo "fusermount: missing -u" >&2
  exit 2
fi
MNT="$2"
if [ -f "$BUSY" ]; then
  n=$(cat "$BUSY")
  if [ "$n" -gt 0 ]; then
    echo $((n - 1)) > "$BUSY"
    echo "fusermount: failed to unmount $MNT: Device or resource busy" >&2
    exit 1
  fi
fi
if ! grep -qxF "$MNT" "$STATE" 2>/dev/null; then
  echo "fusermount: entry for $MNT not found in /etc/mtab" >&2
  exit 1
fi
grep -vxF "$MNT" "$STATE" > "$STATE.tmp"
mv "$STATE.tmp" "$STATE"
exit 0
"#,
                state = mounted.display(),
                log = log.display(),
                busy = busy.display()
            ),
        )?;

        write_executable(
            &bin.join("mount"),
            &format!(
                r#"#!/bin/sh
STATE="{state}"
echo "proc on /proc type proc (rw,nosuid,nodev,noexec,relatime)"
if [ -f "$STATE" ]; then
  while IFS= read -r mp; do
    echo "encfs on $mp type fuse.encfs (rw,nosuid,nodev,relatime)"
  done < "$STATE"
fi
"#,
                state = mounted.display()
            ),
        )?;

        write_executable(
            &bin.join("encfsctl"),
            r#"#!/bin/sh
if [ "$1" != "info" ] || [ ! -f "$2/.encfs6.xml" ]; then
  echo "Unable to load or parse config file" >&2
  exit 1
fi
echo "Version 6 configuration; created by EncFS 1.9.5 (revision 20100713)"
echo "Filesystem cipher: \"ssl/aes\", version 3:0:0 (using 3:0:2)"
"#,
        )?;

        Ok(Self {
            dir,
            bin,
            mounted,
            log,
            busy,
        })
    }

    fn config(&self, busy_timeout_ms: u64) -> VaultmountConfig {
        VaultmountConfig {
            helpers: HelperCfg {
                encfs_path: self.bin.join("encfs").to_string_lossy().into_owned(),
                encfsctl_path: self.bin.join("encfsctl").to_string_lossy().into_owned(),
                mount_list_path: self.bin.join("mount").to_string_lossy().into_owned(),
                unmount_path: Some(self.bin.join("fusermount").to_string_lossy().into_owned()),
                platform: Some(Platform::Linux),
            },
            retry: RetryCfg { busy_timeout_ms },
            ..VaultmountConfig::default()
        }
    }

    fn manager(&self, busy_timeout_ms: u64) -> VaultmountResult<SystemVolumeManager> {
        system_manager(&self.config(busy_timeout_ms))
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn set_busy(&self, attempts: u32) -> VaultmountResult<()> {
        fs::write(&self.busy, format!("{attempts}\n"))?;
        Ok(())
    }

    fn log_lines(&self, prefix: &str) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .filter(|line| line.starts_with(prefix))
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn create_mount_unmount_cycle() -> VaultmountResult<()> {
    let host = FakeHost::new()?;
    let manager = host.manager(50)?;

    let volume = manager
        .create(
            host.path("tmp/./root"),
            host.path("tmp/scratch/../mnt"),
            "secret123",
        )
        .await?;
    assert_eq!(volume.root_path(), host.path("tmp/root"));
    assert_eq!(volume.mount_point(), host.path("tmp/mnt"));
    assert!(volume.root_path().is_dir());
    assert!(volume.mount_point().is_dir());
    assert!(manager.is_mounted(&volume).await?);

    manager.unmount(&volume).await?;
    assert!(!manager.is_mounted(&volume).await?);

    manager.mount(&volume, "secret123").await?;
    assert!(manager.is_mounted(&volume).await?);

    manager.unmount(&volume).await?;
    assert!(!manager.is_mounted(&volume).await?);
    assert!(fs::read_to_string(&host.mounted)?.trim().is_empty());
    assert_eq!(host.log_lines("encfs ").len(), 2);
    Ok(())
}

#[tokio::test]
async fn empty_password_leaves_no_trace() -> VaultmountResult<()> {
    let host = FakeHost::new()?;
    let manager = host.manager(50)?;

    let err = manager
        .create(host.path("root"), host.path("mnt"), "")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EmptyPassword);
    assert!(!host.path("root").exists());
    assert!(!host.path("mnt").exists());
    assert!(host.log_lines("encfs").is_empty());
    Ok(())
}

#[tokio::test]
async fn wrong_password_on_remount_surfaces_helper_stderr() -> VaultmountResult<()> {
    let host = FakeHost::new()?;
    let manager = host.manager(50)?;
    let volume = manager
        .create(host.path("root"), host.path("mnt"), "correct horse")
        .await?;
    manager.unmount(&volume).await?;

    let err = manager.mount(&volume, "battery staple").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Generic);
    let failure = err.helper_failure().expect("helper diagnostics");
    assert_eq!(failure.code, Some(1));
    assert!(failure.stderr.contains("password incorrect"));
    assert!(!manager.is_mounted(&volume).await?);
    Ok(())
}

#[tokio::test]
async fn busy_unmount_recovers_on_single_retry() -> VaultmountResult<()> {
    let host = FakeHost::new()?;
    let manager = host.manager(150)?;
    let volume = manager
        .create(host.path("root"), host.path("mnt"), "pw")
        .await?;
    host.set_busy(1)?;

    let started = Instant::now();
    manager.unmount(&volume).await?;

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(host.log_lines("fusermount").len(), 2);
    assert!(!manager.is_mounted(&volume).await?);
    Ok(())
}

#[tokio::test]
async fn persistent_busy_reports_timeout_after_two_attempts() -> VaultmountResult<()> {
    let host = FakeHost::new()?;
    let manager = host.manager(20)?;
    let volume = manager
        .create(host.path("root"), host.path("mnt"), "pw")
        .await?;
    host.set_busy(5)?;

    let err = manager.unmount(&volume).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BusyTimeout);
    assert_eq!(host.log_lines("fusermount").len(), 2);
    assert_eq!(fs::read_to_string(&host.busy)?.trim(), "3");
    assert!(manager.is_mounted(&volume).await?);
    Ok(())
}

#[tokio::test]
async fn unmounting_an_unmounted_volume_fails_without_retry() -> VaultmountResult<()> {
    let host = FakeHost::new()?;
    let manager = host.manager(5_000)?;
    let volume = Volume::new(host.path("root"), host.path("mnt"))?;

    let started = Instant::now();
    let err = manager.unmount(&volume).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Generic);
    assert!(started.elapsed() < Duration::from_millis(5_000));
    assert_eq!(host.log_lines("fusermount").len(), 1);
    Ok(())
}

#[tokio::test]
async fn info_reports_encfsctl_output() -> VaultmountResult<()> {
    let host = FakeHost::new()?;
    let manager = host.manager(50)?;
    let volume = manager
        .create(host.path("root"), host.path("mnt"), "pw")
        .await?;

    let report = manager.info(&volume).await?;
    assert!(report.starts_with("Version 6 configuration"));

    let stray = Volume::new(host.path("elsewhere"), host.path("mnt"))?;
    let err = manager.info(&stray).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Generic);
    Ok(())
}

#[tokio::test]
async fn mount_point_permission_failure_aborts_create() -> VaultmountResult<()> {
    let host = FakeHost::new()?;
    let locked = host.path("locked");
    fs::create_dir_all(&locked)?;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555))?;

    // Privileged users bypass directory permissions; nothing to observe then.
    if fs::create_dir(locked.join("write-check")).is_ok() {
        eprintln!(
            "skipped mount_point_permission_failure_aborts_create: \
             directory permissions are not enforced for this user"
        );
        return Ok(());
    }

    let manager = host.manager(50)?;
    let err = manager
        .create(host.path("root"), locked.join("mnt"), "pw")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(host.path("root").is_dir());
    assert!(host.log_lines("encfs").is_empty());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[test]
fn missing_explicit_helper_rejects_configuration() -> VaultmountResult<()> {
    let host = FakeHost::new()?;
    let mut config = host.config(50);
    config.helpers.encfs_path = host.path("bin/absent-encfs").to_string_lossy().into_owned();

    match system_manager(&config) {
        Err(VaultmountError::InvalidConfig(message)) => {
            assert!(message.contains("absent-encfs"));
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("expected configuration error"),
    }
    Ok(())
}
