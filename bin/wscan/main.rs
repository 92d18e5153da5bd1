use clap::Parser;
use env_logger::Env;
use log::{error, info, warn, LevelFilter};
use std::{io, path::Path, path::PathBuf};

use wscan::config::DEFAULT_CONFIG_FILE;
use wscan::meta::collect_overrides;
use wscan::traversal::cells;
use wscan::{
    default_destination, estimate, load_config, prepare_destination, AcquisitionDevice,
    AppConfig, Backend, DestinationStatus, Job, LabJackDevice, RasterScan, ScanError,
    ScanGeometry, Session, SimulatedDevice,
};

/// Raster scan of the wire probe over the x/z grid
#[derive(Parser, Debug)]
#[command(name = "wscan")]
#[command(
    about = "Serpentine raster scan with one data burst per grid cell",
    long_about = "Steps the stage over an xn by zn grid (metadata xstep, xn, zstep, zn), \
                  captures one burst per cell and writes it to <DEST>/<xi>_<zi>.dat"
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output directory (default: local timestamp YYYYMMDDhhmmss)
    #[arg(short, long, value_name = "DIR")]
    dest: Option<PathBuf>,

    /// Integer metadata override, repeatable
    #[arg(short = 'i', long = "int", value_name = "KEY=VALUE")]
    int_meta: Vec<String>,

    /// Float metadata override, repeatable
    #[arg(short = 'f', long = "float", value_name = "KEY=VALUE")]
    float_meta: Vec<String>,

    /// String metadata override, repeatable
    #[arg(short = 's', long = "string", value_name = "KEY=VALUE")]
    string_meta: Vec<String>,

    /// Return to the starting cell when the scan is done
    #[arg(short = 'r', long = "return")]
    return_to_origin: bool,

    /// Print the visiting plan and exit without touching hardware
    #[arg(long)]
    dry_run: bool,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            initialize_logging(args.log_level.as_deref().unwrap_or("info"))?;
            error!("Failed to load {}: {}", args.config.display(), e);
            return Err(e.into());
        }
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or(config.console.verbosity.clone());
    initialize_logging(&log_level)?;
    info!("=== wscan ===");
    info!("Configuration: {}", args.config.display());

    // Everything below up to the destination prompt must succeed before the
    // device is touched
    if let Err(e) = apply_arguments(&args, &mut config) {
        error!("{e}");
        return Err(e.into());
    }
    let geometry = match ScanGeometry::from_config(&config.device) {
        Ok(geometry) => geometry,
        Err(e) => {
            error!("{e}");
            return Err(e.into());
        }
    };
    log_plan(&config, &geometry);

    if args.dry_run {
        print_plan(&geometry);
        return Ok(());
    }

    let dest = args.dest.clone().unwrap_or_else(default_destination);
    let status = prepare_destination(&dest, &mut io::stdin().lock(), &mut io::stdout())?;
    if status == DestinationStatus::Declined {
        info!("Existing data in {} kept; nothing scanned", dest.display());
        return Ok(());
    }
    info!("Destination: {}", dest.display());

    let backend = config.device.connection.backend;
    match backend {
        Backend::LabJack => run_and_report(LabJackDevice::new(), config, geometry, &dest),
        Backend::Simulated => {
            warn!("Using the simulated device; no stage will move");
            run_and_report(SimulatedDevice::new(), config, geometry, &dest)
        }
    }
}

/// Apply metadata overrides and flags to the loaded configuration
fn apply_arguments(args: &Args, config: &mut AppConfig) -> Result<(), ScanError> {
    let raw = collect_overrides(&args.int_meta, &args.float_meta, &args.string_meta);
    config.apply_meta_overrides(&raw)?;

    if args.return_to_origin {
        config.scan.return_to_origin = true;
    }
    Ok(())
}

fn log_plan(config: &AppConfig, geometry: &ScanGeometry) {
    let estimate = estimate(geometry, &config.device, &config.scan);
    info!(
        "Grid: {} x {} cells, x step {} pulses, z step {} pulses",
        geometry.xn, geometry.zn, geometry.xstep, geometry.zstep
    );
    info!(
        "Pulse clock {} Hz, waits x {:?} / z {:?}",
        config.device.pulse_frequency(),
        estimate.timing.x_wait,
        estimate.timing.z_wait
    );
    info!(
        "Moves: {} x, {} z; estimated duration {:.0?}",
        estimate.plan.x_moves, estimate.plan.z_moves, estimate.duration
    );
    info!(
        "Return to start cell: {}",
        if config.scan.return_to_origin { "yes" } else { "no" }
    );
}

fn print_plan(geometry: &ScanGeometry) {
    println!("Visiting order ({} cells):", geometry.cell_count());
    for (n, cell) in cells(geometry).enumerate() {
        println!("{:>6}  {}  {}", n, cell, cell.file_name());
    }
}

/// Run the scan on the given backend and report results
fn run_and_report<D: AcquisitionDevice>(
    device: D,
    config: AppConfig,
    geometry: ScanGeometry,
    dest: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(device, config.device);
    let mut scan = RasterScan::new(&mut session, geometry, config.scan, dest);

    info!("Starting scan...");
    match scan.run() {
        Ok(summary) => {
            info!(
                "✓ Scan completed: {} cells, {} files in {}",
                summary.cells_visited,
                summary.files_written,
                dest.display()
            );
            if summary.files_lost > 0 {
                warn!("{} data points could not be written", summary.files_lost);
            }
            Ok(())
        }
        Err(e) => {
            error!("✗ Scan failed: {}", e);
            if e.is_hardware_fault() {
                error!("Stage position is no longer known; re-home before the next scan");
            }
            Err(e.into())
        }
    }
}

/// Initialize logging with configurable level
fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    Ok(())
}
