//! wslog - USB weather station logger.
//!
//! Run with: `cargo run -p wslog-service -- live-log`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wslog_core::{
    Acquisition, MockStation, SharedTimeSource, StationStatus, StationTransport, SystemClock,
};
use wslog_service::{Collector, CollectorError, Config, ConfigError, simulator};
use wslog_store::{DataStores, Record, RowReader, Summariser, SummaryReport};
use wslog_types::{Reading, StationType};

/// Logging interval of the simulated console, in minutes.
const SIMULATED_READ_PERIOD: u8 = 5;
/// Entries already in the simulated console's log at startup.
const SIMULATED_HISTORY: usize = 48;

/// wslog - log, summarise and upload data from a USB weather station.
#[derive(Parser, Debug)]
#[command(name = "wslog")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use a simulated console instead of USB hardware.
    #[arg(long, global = true)]
    simulate: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read the station's settings block and current entry.
    TestConnection {
        /// Also print raw memory as hex.
        #[arg(long)]
        raw: bool,
    },

    /// Change the station's logging interval.
    SetInterval {
        /// Minutes between log entries (1 to 240).
        minutes: u8,
    },

    /// Rebuild every summary from the raw store.
    Reprocess,

    /// Follow the station continuously until interrupted.
    LiveLog,

    /// Fetch logged data, update summaries and upload, then exit.
    Hourly,

    /// Merge readings from a raw-format CSV file into the store.
    Import {
        /// File with rows in the raw store column order.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("wslog={}", level).parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(data_dir) = &args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if args.simulate && config.station.station_type.is_none() {
        config.station.station_type = Some(StationType::Wh1080);
    }

    let result = match args.command {
        Command::Reprocess => {
            validate_offline(&config)?;
            reprocess(&config)
        }
        Command::Import { ref file } => {
            validate_offline(&config)?;
            import(&config, file)
        }
        ref command => {
            config.validate()?;
            run_device_command(command, &config, args.simulate).await
        }
    };

    if let Err(e) = &result
        && is_device_unavailable(e)
    {
        error!("Weather station unavailable, giving up: {:#}", e);
    }
    result
}

fn is_device_unavailable(e: &anyhow::Error) -> bool {
    if let Some(e) = e.downcast_ref::<CollectorError>() {
        return e.is_device_unavailable();
    }
    matches!(
        e.downcast_ref::<wslog_core::Error>(),
        Some(wslog_core::Error::DeviceUnavailable { .. })
    )
}

/// Check the sections commands without a station depend on.
fn validate_offline(config: &Config) -> Result<(), ConfigError> {
    let mut errors = config.storage.validate();
    errors.extend(config.processing.validate());
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors))
    }
}

async fn run_device_command(
    command: &Command,
    config: &Config,
    simulate: bool,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested, finishing current cycle");
            cancel.cancel();
        }
    });

    let station_type = config
        .station
        .station_type
        .context("station type is not configured")?;
    let (transport, console) = open_transport(station_type, simulate, &cancel).await?;
    let time: SharedTimeSource = Arc::new(SystemClock);

    let result = match command {
        Command::TestConnection { raw } => {
            test_connection(config, station_type, transport, time, *raw).await
        }
        Command::SetInterval { minutes } => {
            set_interval(config, station_type, transport, time, *minutes).await
        }
        Command::LiveLog => live_log(config, transport, time, cancel.clone()).await,
        Command::Hourly => hourly(config, transport, time).await,
        Command::Reprocess | Command::Import { .. } => Ok(()),
    };

    cancel.cancel();
    if let Some(console) = console {
        let _ = console.await;
    }
    result
}

/// Open the USB console, or start a simulated one.
async fn open_transport(
    station_type: StationType,
    simulate: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<(Box<dyn StationTransport>, Option<JoinHandle<()>>)> {
    if simulate {
        info!("Using simulated {:?} console", station_type);
        let mock = Arc::new(MockStation::new(station_type));
        simulator::prefill(&mock, SIMULATED_READ_PERIOD, SIMULATED_HISTORY).await?;
        let console = simulator::spawn(mock.clone(), SIMULATED_READ_PERIOD, cancel.clone());
        let transport: Box<dyn StationTransport> = Box::new(mock);
        return Ok((transport, Some(console)));
    }
    open_usb().map(|transport| (transport, None))
}

#[cfg(feature = "usb")]
fn open_usb() -> anyhow::Result<Box<dyn StationTransport>> {
    let transport = wslog_core::UsbTransport::open()?;
    info!("Opened {}", transport.describe());
    Ok(Box::new(transport))
}

#[cfg(not(feature = "usb"))]
fn open_usb() -> anyhow::Result<Box<dyn StationTransport>> {
    anyhow::bail!("built without USB support; rebuild with `--features usb` or pass --simulate")
}

async fn test_connection(
    config: &Config,
    station_type: StationType,
    transport: Box<dyn StationTransport>,
    time: SharedTimeSource,
    raw: bool,
) -> anyhow::Result<()> {
    let mut acquisition = Acquisition::new(
        transport,
        station_type,
        config.station.acquisition_config(),
        StationStatus::default(),
        time,
    );

    let fixed = acquisition.fixed_block(true).await?;
    println!("Fixed block (magic {}):", if fixed.magic_ok() { "ok" } else { "UNKNOWN" });
    for (name, value) in fixed.decode("")? {
        println!("  {:<24} {}", name, value);
    }
    if raw {
        print_hex(0, fixed.raw());
    }

    let ptr = acquisition.current_pos().await?;
    let sample = acquisition.read_sample(ptr, true).await?;
    println!("Current entry at {:#06x}:", ptr);
    println!("{}", serde_json::to_string_pretty(&sample)?);
    if raw {
        print_hex(ptr, &acquisition.read_raw_entry(ptr).await?);
    }
    acquisition.stop();
    Ok(())
}

fn print_hex(base: u16, bytes: &[u8]) {
    for (i, row) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = row.iter().map(|b| format!("{:02x}", b)).collect();
        println!("  {:04x}  {}", usize::from(base) + i * 16, hex.join(" "));
    }
}

async fn set_interval(
    config: &Config,
    station_type: StationType,
    transport: Box<dyn StationTransport>,
    time: SharedTimeSource,
    minutes: u8,
) -> anyhow::Result<()> {
    let status_path = config.status_path();
    let mut acquisition = Acquisition::new(
        transport,
        station_type,
        config.station.acquisition_config(),
        StationStatus::load(&status_path)?,
        time,
    );
    acquisition.set_read_period(minutes).await?;
    // refresh the cached fixed block so the next run sees the new interval
    acquisition.fixed_block(true).await?;
    acquisition.status().save(&status_path)?;
    println!("Logging interval set to {} minutes", minutes);
    Ok(())
}

async fn live_log(
    config: &Config,
    transport: Box<dyn StationTransport>,
    time: SharedTimeSource,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut collector = Collector::new(config, transport, time)?;
    let result = collector.run_live(cancel).await;
    collector.shutdown().await?;
    Ok(result?)
}

async fn hourly(
    config: &Config,
    transport: Box<dyn StationTransport>,
    time: SharedTimeSource,
) -> anyhow::Result<()> {
    let mut collector = Collector::new(config, transport, time)?;
    let result = collector.run_once().await;
    collector.shutdown().await?;
    print_report(&result?);
    Ok(())
}

/// Summariser with the configured pressure offset, or the one saved from
/// the station's settings.
fn offline_summariser(config: &Config) -> anyhow::Result<Summariser> {
    let mut summary = config.processing.summariser_config();
    if summary.pressure_offset.is_none() {
        let status = StationStatus::load(&config.status_path())?;
        summary.pressure_offset = status.fixed_block.and_then(|f| f.pressure_offset());
        if summary.pressure_offset.is_none() {
            warn!("No pressure offset configured or saved; relative pressure will be empty");
        }
    }
    Ok(Summariser::new(summary))
}

fn reprocess(config: &Config) -> anyhow::Result<()> {
    let mut stores = DataStores::open(&config.storage.data_dir, config.storage.store_options())?;
    let report = offline_summariser(config)?.reprocess(&mut stores)?;
    stores.flush()?;
    print_report(&report);
    Ok(())
}

fn import(config: &Config, file: &Path) -> anyhow::Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(file)
        .with_context(|| format!("opening {}", file.display()))?;

    let mut readings = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("{}:{}", file.display(), line + 1))?;
        let reading = Reading::read_row(&mut RowReader::new(&row))
            .with_context(|| format!("{}:{}", file.display(), line + 1))?;
        readings.push(reading);
    }

    let mut stores = DataStores::open(&config.storage.data_dir, config.storage.store_options())?;
    let result = stores.raw.import(readings)?;
    info!(
        "Imported {} reading(s) ({} replaced) into {} partition(s)",
        result.imported, result.replaced, result.partitions
    );
    let report = offline_summariser(config)?.reprocess(&mut stores)?;
    stores.flush()?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SummaryReport) {
    println!(
        "Summaries: {} hourly, {} daily, {} monthly",
        report.hourly, report.daily, report.monthly
    );
    for reset in &report.counter_resets {
        println!(
            "Rain counter reset at {}: {} -> {} mm",
            reset.timestamp, reset.previous, reset.current
        );
    }
}

/// Resolve when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
