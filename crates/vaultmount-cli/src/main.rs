//! Vaultmount command-line interface for creating, mounting, and unmounting encfs volumes.

use anyhow::{bail, ensure, Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use rpassword::prompt_password;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};
use vaultmount_core::{
    config::{VaultmountConfig, DEFAULT_CONFIG_PATH},
    logging, ErrorKind, Volume, VaultmountError,
};
use vaultmount_encfs::{system_manager, SystemVolumeManager};
use zeroize::Zeroizing;

fn load_cli_config(path: &Path) -> Result<VaultmountConfig> {
    let config = VaultmountConfig::load_or_bootstrap(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if config.path != path {
        println!(
            "Using bootstrap configuration at {} (pass --config to replace).",
            config.path.display()
        );
    }

    Ok(config)
}

fn cli_manager(path: &Path) -> Result<SystemVolumeManager> {
    let config = load_cli_config(path)?;
    system_manager(&config).context("failed to resolve helper binaries")
}

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "vaultmount",
    version,
    about = "Lifecycle manager for encfs encrypted directories."
)]
struct Cli {
    /// Path to the vaultmount configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments identifying a volume on disk.
#[derive(clap::Args, Debug)]
struct VolumeArgs {
    /// Directory holding the encrypted data.
    root: PathBuf,

    /// Directory where the decrypted view is exposed.
    mount_point: PathBuf,
}

impl VolumeArgs {
    fn volume(&self) -> Result<Volume> {
        Volume::new(&self.root, &self.mount_point).map_err(anyhow::Error::new)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create both directories, initialise a fresh volume, and mount it.
    Create {
        #[command(flatten)]
        volume: VolumeArgs,

        /// Password for the new volume; prompted (with confirmation) when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Mount an existing volume.
    Mount {
        #[command(flatten)]
        volume: VolumeArgs,

        /// Volume password; prompted when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Unmount a volume, retrying once if the mount point is busy.
    Unmount {
        #[command(flatten)]
        volume: VolumeArgs,
    },

    /// Report whether the mount point appears in the system mount list.
    Status {
        #[command(flatten)]
        volume: VolumeArgs,
    },

    /// Print encfsctl metadata for the encrypted root.
    Info {
        #[command(flatten)]
        volume: VolumeArgs,
    },

    /// Validate a configuration file, or print its JSON schema.
    Validate {
        /// Configuration file to validate.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        file: PathBuf,

        /// Print the JSON schema instead of validating.
        #[arg(long)]
        schema: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    let config_path = cli.config.clone();

    match cli.command {
        Commands::Create { volume, password } => {
            let password = match password {
                Some(value) => Zeroizing::new(value),
                None => prompt_new_password()?,
            };
            let manager = cli_manager(&config_path)?;
            let created = manager
                .create(&volume.root, &volume.mount_point, &password)
                .await?;
            println!(
                "Created {} and mounted it at {}.",
                created.root_path().display(),
                created.mount_point().display()
            );
        }

        Commands::Mount { volume, password } => {
            let target = volume.volume()?;
            let password = match password {
                Some(value) => Zeroizing::new(value),
                None => Zeroizing::new(prompt_password("Volume password: ")?),
            };
            let manager = cli_manager(&config_path)?;
            manager.mount(&target, &password).await?;
            println!("Mounted {}.", target.mount_point().display());
        }

        Commands::Unmount { volume } => {
            let target = volume.volume()?;
            let manager = cli_manager(&config_path)?;
            match manager.unmount(&target).await {
                Ok(()) => println!("Unmounted {}.", target.mount_point().display()),
                Err(err) if err.kind() == ErrorKind::BusyTimeout => {
                    warn!("close open files under the mount point and try again");
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
        }

        Commands::Status { volume } => {
            let target = volume.volume()?;
            let manager = cli_manager(&config_path)?;
            let state = if manager.is_mounted(&target).await? {
                "mounted"
            } else {
                "not mounted"
            };
            println!("{}: {state}", target.mount_point().display());
        }

        Commands::Info { volume } => {
            let target = volume.volume()?;
            let manager = cli_manager(&config_path)?;
            let report = manager.info(&target).await?;
            print!("{report}");
        }

        Commands::Validate { file, schema } => {
            if schema {
                let schema = schema_for!(VaultmountConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let cfg = match VaultmountConfig::load(&file) {
                Ok(cfg) => cfg,
                Err(VaultmountError::InvalidConfig(issues)) => {
                    bail!("configuration {} is invalid: {issues}", file.display())
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to load configuration from {}", file.display())
                    })
                }
            };

            println!(
                "Configuration valid (platform={:?}, busy timeout={}ms).",
                cfg.platform(),
                cfg.busy_timeout().as_millis()
            );
        }
    }

    Ok(())
}

fn prompt_new_password() -> Result<Zeroizing<String>> {
    let first = Zeroizing::new(prompt_password("New volume password: ")?);
    ensure!(!first.is_empty(), "password must not be empty");
    let second = Zeroizing::new(prompt_password("Confirm password: ")?);
    if *first != *second {
        bail!("passwords do not match");
    }
    Ok(first)
}
