use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use devlink_core::{
    DeviceDirectory, DeviceLifecycle, DeviceMode, DevlinkConfig, DevlinkDevice, GenlSocket,
    SocketMode, TracingObserver,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Devlink firmware update tool", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Replay a device snapshot instead of talking to the kernel
    #[arg(long, global = true)]
    emulation: Option<PathBuf>,

    /// Write a device snapshot of the kernel exchanges to this path
    #[arg(long, global = true)]
    record: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devlink devices
    List,
    /// Show versions and components of a device
    Info {
        /// Device as bus/dev, e.g. pci/0000:01:00.0
        device: String,
    },
    /// Flash a firmware image
    Flash {
        device: String,
        /// Firmware image file
        file: PathBuf,
        /// Component to flash; the driver default if omitted
        #[arg(long)]
        component: Option<String>,
    },
    /// Activate a stored firmware version
    Activate { device: String, component: String },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => DevlinkConfig::load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => DevlinkConfig::default(),
    };
    if args.emulation.is_some() {
        config.emulation = args.emulation.clone();
    }
    if args.record.is_some() {
        config.record = args.record.clone();
    }

    let mode = if config.emulation.is_some() {
        DeviceMode::Emulated
    } else if config.record.is_some() {
        DeviceMode::Record
    } else {
        DeviceMode::Live
    };
    let mut directory = DeviceDirectory::new(config.clone()).with_mode(mode);

    if let Some(path) = &config.emulation {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut device = DevlinkDevice::from_json(&json)?;
        device.apply_config(&config);
        directory.insert(device)?;
        info!(snapshot = %path.display(), "Loaded emulated device");
    }

    match args.command {
        Command::List => list(&mut directory, mode),
        Command::Info { device } => {
            let device = open_device(&mut directory, &device)?;
            println!("{device}");
            save_snapshot(device, &config)
        }
        Command::Flash {
            device,
            file,
            component,
        } => {
            let firmware =
                fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let device = open_device(&mut directory, &device)?;
            flash(device, &firmware, component.as_deref())?;
            save_snapshot(device, &config)
        }
        Command::Activate { device, component } => {
            let device = open_device(&mut directory, &device)?;
            device.activate(&component)?;
            save_snapshot(device, &config)
        }
    }
}

fn list(directory: &mut DeviceDirectory, mode: DeviceMode) -> Result<()> {
    if mode != DeviceMode::Emulated {
        let mut socket = GenlSocket::open(&SocketMode::Live).context("failed to open devlink socket")?;
        directory.enumerate(&mut socket)?;
    }
    if directory.is_empty() {
        info!("No devlink devices found");
    }
    for device in directory.iter() {
        println!("{}", device.backend_id().unwrap_or_default());
    }
    Ok(())
}

fn parse_handle(device: &str) -> Result<(&str, &str)> {
    match device.split_once('/') {
        Some((bus, dev)) if !bus.is_empty() && !dev.is_empty() => Ok((bus, dev)),
        _ => bail!("invalid device '{device}', expected bus/dev"),
    }
}

fn open_device<'a>(directory: &'a mut DeviceDirectory, device: &str) -> Result<&'a mut DevlinkDevice> {
    let (bus, dev) = parse_handle(device)?;
    let device = directory.device_added(bus, dev)?;
    device.open()?;
    device.setup()?;
    Ok(device)
}

fn flash(device: &mut DevlinkDevice, firmware: &[u8], component: Option<&str>) -> Result<()> {
    device.prepare()?;
    let result = device.write_firmware(firmware, component, &mut TracingObserver);
    if let Err(e) = device.cleanup() {
        warn!(error = %e, "Cleanup failed");
    }
    result?;
    info!("Firmware written");
    Ok(())
}

fn save_snapshot(device: &DevlinkDevice, config: &DevlinkConfig) -> Result<()> {
    let Some(path) = &config.record else {
        return Ok(());
    };
    fs::write(path, device.to_json()?).with_context(|| format!("failed to write {}", path.display()))?;
    info!(snapshot = %path.display(), events = device.events().len(), "Saved device snapshot");
    Ok(())
}
