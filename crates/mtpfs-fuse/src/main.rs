//! mtpfs FUSE mount daemon

use anyhow::{bail, Context};
use clap::Parser;
use mtpfs_device::{MemoryDevice, MtpConnector, MtpDevice};
use mtpfs_fuse::cli::{Cli, DeviceSelector};
use mtpfs_fuse::config::MtpfsConfig;
use mtpfs_fuse::filesystem::MtpFuse;
use mtpfs_fuse::mount::{options_to_fuser, validate_mountpoint};
use mtpfs_fuse::policy::LocalAccountService;
use mtpfs_fuse::MtpFileSystem;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let request = Cli::parse().into_request().unwrap_or_else(|e| e.exit());

    let level = if request.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    tracing::info!("mtpfs starting...");

    let mut config = match &request.config {
        Some(path) => MtpfsConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MtpfsConfig::default(),
    };
    if request.options.enable_move {
        config.device.enable_move = true;
    }

    validate_mountpoint(&request.mountpoint, request.options.nonempty)?;

    let connector: Arc<dyn MtpConnector> = if request.emulate {
        let device = MemoryDevice::new();
        device.add_storage(&config.emulated.name, config.emulated.capacity_bytes);
        Arc::new(device)
    } else {
        bail!("no USB MTP transport is available in this build, run with --emulate");
    };

    let device = MtpDevice::new(connector, config.device.clone())?;
    match &request.selector {
        DeviceSelector::First => device.connect_by_index(0),
        DeviceSelector::Index(index) => device.connect_by_index(*index),
        DeviceSelector::File(path) => device.connect_by_device_file(path),
    }
    .context("connecting to MTP device")?;
    let info = device.device_info();
    tracing::info!(
        "connected to {} ({} {}, version {})",
        info.friendly_name,
        info.manufacturer,
        info.model,
        info.version
    );

    let accounts = Arc::new(LocalAccountService::new(config.foreground_user));
    let fs = MtpFileSystem::new(device.clone(), accounts, &config.scratch_root)?;
    let options = options_to_fuser(&request.options, &info.friendly_name);
    let session = fuser::spawn_mount2(
        MtpFuse::new(Arc::new(fs), config.fuse_config()),
        &request.mountpoint,
        &options,
    )
    .with_context(|| format!("mounting at {}", request.mountpoint.display()))?;
    tracing::info!("mounted at {}", request.mountpoint.display());

    tokio::signal::ctrl_c().await?;
    tracing::info!("unmounting {}", request.mountpoint.display());
    session.join();
    device.disconnect();
    Ok(())
}
