use clap::Parser;
use env_logger::Env;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;

use wscan::config::DEFAULT_CONFIG_FILE;
use wscan::{
    load_config, parse_distance, AcquisitionDevice, AppConfig, Axis, AxisMotion, AxisMove,
    Backend, Job, LabJackDevice, ScanError, Session, SimulatedDevice,
};

/// Move one stage axis by a physical distance
#[derive(Parser, Debug)]
#[command(name = "move")]
#[command(
    about = "Point-to-point move of the x or z stage axis",
    long_about = "Converts DISTANCE to pulses with the axis calibration from the \
                  configuration file and drives the axis open loop"
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Return as soon as the pulses are issued instead of waiting for them
    #[arg(short = 'e', long)]
    fast_exit: bool,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Axis to move (x or z)
    axis: String,

    /// Signed distance in calibration units
    #[arg(allow_negative_numbers = true, allow_hyphen_values = true)]
    distance: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match load_config(&args.config) {
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

    let motion = match resolve_motion(&args, &config) {
        Ok(motion) => motion,
        Err(e) => {
            error!("{e}");
            return Err(e.into());
        }
    };
    info!(
        "{} axis: {} / {} per pulse = {} pulses",
        motion.axis, motion.distance, motion.calibration, motion.pulses
    );

    let backend = config.device.connection.backend;
    match backend {
        Backend::LabJack => run_and_report(LabJackDevice::new(), config, motion, args.fast_exit),
        Backend::Simulated => {
            warn!("Using the simulated device; no stage will move");
            run_and_report(SimulatedDevice::new(), config, motion, args.fast_exit)
        }
    }
}

fn resolve_motion(args: &Args, config: &AppConfig) -> Result<AxisMotion, ScanError> {
    let axis = Axis::parse_letter(&args.axis)?;
    let distance = parse_distance(&args.distance)?;
    AxisMotion::from_config(&config.device, axis, distance)
}

fn run_and_report<D: AcquisitionDevice>(
    device: D,
    config: AppConfig,
    motion: AxisMotion,
    fast_exit: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::new(device, config.device);
    let mut job = AxisMove::new(&mut session, motion);
    if fast_exit {
        job = job.fast_exit();
    }

    match job.run() {
        Ok(done) => {
            info!("✓ Moved {} by {} pulses", done.axis, done.pulses);
            Ok(())
        }
        Err(e) => {
            error!("✗ Move failed: {}", e);
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
