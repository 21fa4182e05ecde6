//! slamd — main daemon for the SLAM service core.

use anyhow::{Context, Result};
use carto_engine::CartoEngine;
use carto_facade::NativeEngine;
use clap::Parser;
use sensors::{TimedLidar, TimedMovementSensor};
use slam_service::{FileConfig, Service};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use types::{CartoConfig, LidarConfig, Properties};

#[derive(Parser)]
#[command(name = "slamd", about = "SLAM service core daemon")]
struct Args {
    /// Path to configuration file (algorithm options, spec §6)
    #[arg(short, long, default_value = "config/slam.toml")]
    config: PathBuf,

    /// Lidar serial port (ignored with --sim)
    #[arg(long, default_value = "/dev/ttyUSB0")]
    lidar_port: String,

    /// Lidar scan rate in Hz. A live lidar must report a nonzero rate;
    /// replay datasets always run as 0 Hz regardless of this flag.
    #[arg(long, default_value = "10")]
    lidar_hz: u32,

    /// Movement sensor serial port (ignored with --sim)
    #[arg(long, default_value = "/dev/ttyUSB1")]
    movement_port: String,

    /// Movement sensor update rate in Hz, live mode only.
    #[arg(long, default_value = "10")]
    movement_hz: u32,

    /// Lidar component name, reported back as the position reference frame.
    #[arg(long, default_value = "lidar0")]
    camera_name: String,

    /// Movement sensor component name.
    #[arg(long, default_value = "")]
    movement_sensor_name: String,

    /// Component reference reported alongside position().
    #[arg(long, default_value = "slam0")]
    component_reference: String,

    /// Build a new map instead of localizing against an existing one.
    #[arg(long)]
    enable_mapping: bool,

    /// Path to a previously captured map package. Empty means no existing map.
    #[arg(long, default_value = "")]
    existing_map: String,

    /// Movement sensor reports IMU readings.
    #[arg(long)]
    imu_supported: bool,

    /// Movement sensor reports wheel-odometer readings.
    #[arg(long)]
    odometer_supported: bool,

    /// Run against recorded datasets instead of live serial hardware.
    #[arg(long)]
    sim: bool,

    /// Recorded lidar scan directory, required with --sim.
    #[arg(long)]
    lidar_dataset: Option<PathBuf>,

    /// Recorded movement-sensor log, required with --sim when IMU or
    /// odometer support is enabled.
    #[arg(long)]
    movement_dataset: Option<PathBuf>,

    /// Algorithm option override as KEY=VALUE (spec §6); repeatable, wins
    /// over the config file.
    #[arg(long = "option", value_parser = parse_key_val)]
    options: Vec<(String, String)>,

    /// Log directory for text logs.
    #[arg(long, default_value = "/var/log/slamd")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got: {s}"))?;
    Ok((k.to_string(), v.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The _guard must be held for the lifetime of the program to ensure
    // logs are flushed.
    let _log_guard = init_logging(&args.log_dir, &args.log_level)?;

    let file_config = FileConfig::load(&args.config)?;
    info!(path = %args.config.display(), "loaded slam config");

    let cli_options: HashMap<String, String> = args.options.iter().cloned().collect();
    let options = file_config.merged_options(&cli_options);
    let algo_cfg = slam_service::parse_algo_config(&options)?;

    let cfg = CartoConfig {
        camera_name: args.camera_name.clone(),
        movement_sensor_name: args.movement_sensor_name.clone(),
        component_reference: args.component_reference.clone(),
        lidar_config: LidarConfig::TwoD,
        enable_mapping: args.enable_mapping,
        existing_map: args.existing_map.clone(),
        use_cloud_slam: false,
    };

    let movement_properties =
        Properties { imu_supported: args.imu_supported, odometer_supported: args.odometer_supported };
    let movement_enabled = args.imu_supported || args.odometer_supported;

    let (lidar, movement): (Arc<dyn TimedLidar>, Option<Arc<dyn TimedMovementSensor>>) = if args.sim {
        let dataset = args.lidar_dataset.clone().context("--lidar-dataset is required with --sim")?;
        let lidar: Arc<dyn TimedLidar> = Arc::new(
            lidar::ReplayLidar::open(args.camera_name.clone(), &dataset).context("opening lidar dataset")?,
        );
        let movement: Option<Arc<dyn TimedMovementSensor>> = if movement_enabled {
            let log = args
                .movement_dataset
                .clone()
                .context("--movement-dataset is required with --sim when a movement channel is enabled")?;
            Some(Arc::new(
                movement_sensor::ReplayMovementSensor::open(
                    args.movement_sensor_name.clone(),
                    &log,
                    movement_properties,
                )
                .context("opening movement sensor log")?,
            ))
        } else {
            None
        };
        (lidar, movement)
    } else {
        let lidar: Arc<dyn TimedLidar> = Arc::new(
            lidar::LiveLidar::open(
                args.camera_name.clone(),
                lidar::Config { port: args.lidar_port.clone(), baud_rate: 115200 },
                args.lidar_hz,
            )
            .context("opening lidar serial port")?,
        );
        let movement: Option<Arc<dyn TimedMovementSensor>> = if movement_enabled {
            Some(Arc::new(
                movement_sensor::LiveMovementSensor::open(
                    args.movement_sensor_name.clone(),
                    movement_sensor::Config { port: args.movement_port.clone(), baud_rate: 115200 },
                    args.movement_hz,
                    movement_properties,
                )
                .context("opening movement sensor serial port")?,
            ))
        } else {
            None
        };
        (lidar, movement)
    };

    let engine: Box<dyn NativeEngine + Send> = Box::new(CartoEngine::new());

    let service = Service::new(cfg, algo_cfg, engine, lidar, movement)
        .await
        .context("constructing slam service")?;

    info!("slam service ready");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    service.close().await;

    Ok(())
}

/// Dual-layer logging: colored stdout plus a daily-rotating file, gated by
/// `RUST_LOG` if set and `--log-level` otherwise.
///
/// Returns a guard that must be held for the lifetime of the program to
/// ensure logs are properly flushed on shutdown.
fn init_logging(log_dir: &std::path::Path, level: &str) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("Error: Cannot create log directory '{}': {}", log_dir.display(), e);
        eprintln!();
        eprintln!("Try running with a local directory:");
        eprintln!();
        eprintln!("  cargo run --bin slamd -- --sim --lidar-dataset ./dataset --log-dir ./logs");
        eprintln!();
        return Err(e.into());
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "slamd.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("slamd={level},slam_service={level}")));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true).with_thread_ids(false);

    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking_file).with_ansi(false).with_target(true);

    tracing_subscriber::registry().with(filter).with(stdout_layer).with(file_layer).init();

    Ok(guard)
}
