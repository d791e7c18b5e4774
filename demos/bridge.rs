//! Sensor bridge device runner
//!
//! Opens the commissioning and operational ports and feeds the attribute store with
//! simulated sensor readings.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example bridge -- --config device.json --verbose
//! cargo run --example bridge -- --write-default-config device.json
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use matd::{
    attributes::AttributeStore,
    bridge::{self, SensorReading},
    config::DeviceConfig,
    device,
    storage::FileStorage,
    telemetry::TelemetryReporter,
    transport::Transport,
};

#[derive(Parser, Debug)]
#[command(about = "Run sensor bridge device")]
struct Cli {
    /// Enable verbose logging
    #[clap(long, default_value_t = false)]
    verbose: bool,

    /// Device configuration (JSON), defaults are used when omitted
    #[clap(long)]
    config: Option<String>,

    /// Write default configuration to given file and exit
    #[clap(long)]
    write_default_config: Option<String>,

    /// MAC address used to derive setup pin when config has none
    #[clap(long)]
    mac: Option<String>,

    /// Seconds between simulated readings, 0 disables simulation
    #[clap(long, default_value_t = 2)]
    reading_interval: u64,

    /// Stop after given number of seconds
    #[clap(long)]
    duration: Option<u64>,
}

async fn simulate_sensor(readings: bridge::ReadingSender, interval: Duration) {
    let mut tick: u32 = 0;
    loop {
        tokio::time::sleep(interval).await;
        tick = tick.wrapping_add(1);
        let flame = (tick / 10) % 2 == 0;
        let reading = SensorReading {
            flame_detected: flame,
            fan_speed: if flame { 40 + (tick % 20) as u8 } else { 0 },
            temperature: 60 + (tick % 15) as i16,
            error_code: 0,
            valid: true,
        };
        if !readings.send(reading) {
            log::warn!("reading dropped");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = {
        if cli.verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        }
    };
    env_logger::Builder::new()
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(log_level)
        .format_line_number(true)
        .format_file(true)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    if let Some(path) = cli.write_default_config {
        DeviceConfig::default().save(&path)?;
        println!("default configuration written to {}", path);
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => DeviceConfig::load(path)?,
        None => DeviceConfig::default(),
    };
    if cli.mac.is_some() {
        config.mac_address = cli.mac.clone();
    }
    let storage = Arc::new(FileStorage::new(&config.storage_dir)?);
    let store = AttributeStore::new();
    let device = device::Device::new(&config, storage, store.clone())?;
    println!(
        "setup pin {} discriminator {}",
        device.setup_pin(),
        device.discriminator()
    );

    if !config.telemetry_controllers.is_empty() {
        let reporter = TelemetryReporter::new(
            std::net::SocketAddr::new(config.bind_address, 0),
            config.telemetry_interval_ms,
        )
        .await?;
        for c in config.telemetry_controllers.iter() {
            reporter.add_controller(*c)?;
        }
        reporter.attach(&store)?;
    }

    let transport = Transport::new(
        config.bind_address,
        config.operational_port,
        config.commissioning_port,
    )
    .await?;

    let (readings, receiver) = bridge::channel();
    if cli.reading_interval > 0 {
        tokio::spawn(simulate_sensor(
            readings,
            Duration::from_secs(cli.reading_interval),
        ));
    }

    let token = tokio_util::sync::CancellationToken::new();
    if let Some(secs) = cli.duration {
        let stop = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            stop.cancel();
        });
    }
    device::run(device, transport, receiver, token).await
}
