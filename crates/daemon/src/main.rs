//! pcsc-hotplug daemon
//!
//! Watches the USB and PC-card buses and keeps the smart-card reader registry
//! in sync with the readers that are plugged in and have an installed driver.

mod config;
mod registry;
mod service;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{WatcherBridge, WatcherEvent, setup_logging};
use config::DaemonConfig;
use engine::enumerator::{PcCardEnumerator, UsbEnumerator};
use engine::events::{PollingSource, UsbHotplugSource};
use engine::provider::BundleDirectoryProvider;
use engine::{DeviceSnapshot, DriverCatalog, Scanner, Watcher, WatcherParts};
use model::{BusKind, DeviceEnumerator, EventSource};
use registry::LoggingRegistry;
use serde::Serialize;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Longest wait for the startup rescan before giving up
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "pcsc-hotplugd")]
#[command(
    author,
    version,
    about = "Smart-card reader hotplug daemon"
)]
#[command(long_about = "
Watches the USB and PC-card buses for smart-card readers, matches them
against the installed reader drivers and registers or unregisters a reader
for every matched device.

EXAMPLES:
    # Run with default config
    pcsc-hotplugd

    # Run with custom config
    pcsc-hotplugd --config /path/to/hotplugd.toml

    # Scan once and print the matched readers
    pcsc-hotplugd --once

    # Same, as JSON
    pcsc-hotplugd --once --json

    # List installed reader drivers
    pcsc-hotplugd --list-drivers

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/pcsc-hotplug/hotplugd.toml
    3. /etc/pcsc-hotplug/hotplugd.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Run a single rescan, print the matched readers and exit
    #[arg(long)]
    once: bool,

    /// With --once, print the readers as JSON
    #[arg(long, requires = "once")]
    json: bool,

    /// Print the driver catalog and exit
    #[arg(long)]
    list_drivers: bool,

    /// Report lifecycle to systemd
    #[arg(long)]
    service: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DaemonConfig::default();
        let path = DaemonConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        DaemonConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DaemonConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("pcsc-hotplugd v{}", env!("CARGO_PKG_VERSION"));
    info!("Driver directory: {}", config.drivers_dir().display());

    if args.list_drivers {
        return list_drivers(&config);
    }

    if args.once {
        return scan_once(&config, args.json);
    }

    let service_mode = args.service || config.daemon.service_mode;
    run(config, service_mode).await
}

fn build_enumerators(config: &DaemonConfig) -> Vec<Box<dyn DeviceEnumerator>> {
    let mut enumerators: Vec<Box<dyn DeviceEnumerator>> = Vec::new();

    if config.usb.enabled {
        match UsbEnumerator::new() {
            Ok(usb) => enumerators.push(Box::new(usb)),
            Err(e) => warn!("USB bus disabled: {}", e),
        }
    }
    if config.pccard.enabled {
        enumerators.push(Box::new(PcCardEnumerator::new(config.sysfs_root())));
    }

    enumerators
}

/// Event sources for the buses that have a working enumerator
fn build_event_sources(config: &DaemonConfig, usb_available: bool) -> Vec<Box<dyn EventSource>> {
    let mut sources: Vec<Box<dyn EventSource>> = Vec::new();

    if usb_available && config.usb.hotplug {
        sources.push(Box::new(UsbHotplugSource::new()));
    }
    if config.pccard.enabled {
        sources.push(Box::new(PollingSource::new(
            Box::new(PcCardEnumerator::new(config.sysfs_root())),
            config.poll_interval(),
        )));
    }

    sources
}

fn list_drivers(config: &DaemonConfig) -> Result<()> {
    let catalog = DriverCatalog::load(&BundleDirectoryProvider::new(), &config.drivers_dir())
        .context("Failed to load driver catalog")?;

    if catalog.is_empty() {
        println!("No reader drivers installed.");
        return Ok(());
    }

    println!("Found {} reader driver(s):\n", catalog.len());
    for driver in &catalog {
        println!(
            "  {:04x}:{:04x}  {}",
            driver.vendor_id, driver.product_id, driver.friendly_name
        );
        println!("      {}", driver.library_path);
    }
    Ok(())
}

/// One registered reader, as printed by `--once --json`
#[derive(Debug, Serialize)]
struct ReaderEntry<'a> {
    name: &'a str,
    library: &'a str,
    bus: BusKind,
    vendor_id: u32,
    product_id: u32,
    address: u32,
    port: u32,
}

fn reader_entries(snapshot: &DeviceSnapshot, base_port: u32) -> Vec<ReaderEntry<'_>> {
    snapshot
        .iter()
        .map(|record| ReaderEntry {
            name: record.friendly_name(),
            library: record.library_path(),
            bus: record.bus,
            vendor_id: record.driver.vendor_id,
            product_id: record.driver.product_id,
            address: record.address,
            port: record.port(base_port).0,
        })
        .collect()
}

fn scan_once(config: &DaemonConfig, json: bool) -> Result<()> {
    let mut scanner = Scanner::new(
        &config.watcher_config(),
        Box::new(BundleDirectoryProvider::new()),
        build_enumerators(config),
        Box::new(LoggingRegistry::new()),
    );

    let outcome = scanner.rescan().context("Rescan failed")?;
    let snapshot = scanner.snapshot();
    let readers = reader_entries(&snapshot, scanner.base_port());

    if json {
        let output =
            serde_json::to_string_pretty(&readers).context("Failed to serialize readers")?;
        println!("{}", output);
        return Ok(());
    }

    if readers.is_empty() {
        println!(
            "No supported readers found ({} drivers installed).",
            outcome.drivers
        );
        return Ok(());
    }

    println!("Found {} reader(s):\n", readers.len());
    for reader in readers {
        println!(
            "  [{:#x}] {} ({} {:04x}:{:04x})",
            reader.port, reader.name, reader.bus, reader.vendor_id, reader.product_id
        );
        println!("      {}", reader.library);
    }
    Ok(())
}

/// Forward watcher events to the log and the systemd status line
async fn report_events(bridge: WatcherBridge, service_mode: bool) {
    loop {
        let status = match bridge.recv_event().await {
            Ok(WatcherEvent::ScanCompleted { devices, .. }) => {
                format!("Watching {} reader(s)", devices)
            }
            Ok(WatcherEvent::ScanFailed { reason }) => {
                error!("Rescan failed: {}", reason);
                format!("Rescan failed: {}", reason)
            }
            Ok(WatcherEvent::Stopped) | Err(_) => break,
        };

        if service_mode && let Err(e) = service::notify_status(&status) {
            warn!("Failed to send status to systemd: {:#}", e);
        }
    }
}

async fn run(config: DaemonConfig, service_mode: bool) -> Result<()> {
    let enumerators = build_enumerators(&config);
    let usb_available = enumerators.iter().any(|e| e.bus() == BusKind::Usb);
    let parts = WatcherParts {
        provider: Box::new(BundleDirectoryProvider::new()),
        enumerators,
        event_sources: build_event_sources(&config, usb_available),
        registry: Box::new(LoggingRegistry::new()),
    };

    let handle =
        Watcher::spawn(config.watcher_config(), parts).context("Failed to start hotplug watcher")?;
    let bridge = handle.bridge();

    // Answered only after the startup rescan
    let status = tokio::time::timeout(STARTUP_TIMEOUT, bridge.status())
        .await
        .map_err(|_| anyhow!("Startup rescan did not finish within {:?}", STARTUP_TIMEOUT))?
        .context("Failed to query watcher status")?;
    info!(
        "Startup rescan done: {} reader(s), state {}",
        status.devices, status.state
    );

    if service_mode {
        if service::is_systemd() {
            info!("Running under systemd");
        }
        service::notify_ready().context("Failed to notify systemd ready")?;
    }

    let events = tokio::spawn(report_events(bridge.clone(), service_mode));

    info!("Press Ctrl+C to shutdown");
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    if service_mode {
        service::notify_stopping().context("Failed to notify systemd stopping")?;
    }

    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .context("Watcher shutdown task failed")?
        .context("Failed to stop hotplug watcher")?;

    if let Err(e) = events.await {
        error!("Event reporter failed: {}", e);
    }

    info!("Daemon shutdown complete");
    Ok(())
}
