//! BTZen - Read BLE sensors through BlueZ
//!
//! Prints one JSON line per reading until the requested number of readings
//! is taken or the process is interrupted.

mod config;

use anyhow::{bail, Result};
use btzen_bus::BluezTransport;
use btzen_core::{Mode, ReadingDecoder};
use btzen_sensor::{Bus, Sensor, SensorError};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "btzen")]
#[command(about = "Read BLE sensors managed by BlueZ")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "btzen.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Readings per sensor, 0 reads until interrupted
    #[arg(short = 'n', long, default_value_t = 0)]
    count: u64,

    /// Write a sample configuration file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("BTZen v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote sample configuration");
        return Ok(());
    }

    let config = config::load_config(&args.config)?;
    if config.sensors.is_empty() {
        bail!("No sensors configured in {}", args.config.display());
    }

    let transport = Arc::new(BluezTransport::system()?);
    let bus = Bus::new(transport, config.bus.clone());

    let dispatcher = bus.clone();
    let dispatch = tokio::spawn(async move { dispatcher.run().await });

    let mut readers = JoinSet::new();
    for sensor_config in &config.sensors {
        let kind = sensor_config.kind()?;
        let sensor = bus.sensor(
            sensor_config.address.clone(),
            kind,
            sensor_config.mode(),
            ReadingDecoder::new(kind),
        )?;
        if let Some(trigger) = sensor_config.trigger()? {
            sensor.set_trigger(trigger);
        }
        readers.spawn(read_sensor(sensor, sensor_config.interval(), args.count));
    }

    tokio::select! {
        _ = async {
            while let Some(result) = readers.join_next().await {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "Sensor reader failed"),
                    Err(e) => warn!(error = %e, "Sensor reader task ended abnormally"),
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, closing sensors");
        }
    }

    // dropping the readers closes their sensors
    readers.shutdown().await;
    bus.shutdown();
    dispatch.await??;

    Ok(())
}

/// Enable a sensor and print its readings
async fn read_sensor(
    sensor: Sensor<ReadingDecoder>,
    interval: Duration,
    count: u64,
) -> Result<(), SensorError> {
    sensor.enable().await?;

    let mut taken = 0;
    while count == 0 || taken < count {
        let reading = sensor.read().await?;
        let line = serde_json::json!({
            "time": Utc::now().to_rfc3339(),
            "device": sensor.address().as_str(),
            "name": sensor.name(),
            "sensor": sensor.kind().name,
            "reading": reading,
        });
        println!("{}", line);
        taken += 1;

        if sensor.mode() == Mode::Polling && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(())
}
