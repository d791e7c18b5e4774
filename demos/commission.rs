//! Commissioner for the sensor bridge device
//!
//! Pairs with the device using its setup pin and then reads attributes, subscribes
//! or sends Wi-Fi credentials over the established session.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example commission -- --device 127.0.0.1 read
//! cargo run --example commission -- --device 127.0.0.1 subscribe --max-interval 10
//! cargo run --example commission -- --device 127.0.0.1 wifi myssid mypassword
//! ```

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use matd::{
    attributes::AttributePath,
    clusters::{self, diagnostics, level_control, network_commissioning, on_off, temperature},
    controller::Controller,
    tlv::TlvItem,
    transport::{DEFAULT_COMMISSIONING_PORT, DEFAULT_OPERATIONAL_PORT},
};

const DEFAULT_LOCAL_ADDRESS: &str = "0.0.0.0:0";

#[derive(Parser, Debug)]
#[command(about = "Commission sensor bridge device")]
struct Cli {
    /// Enable verbose logging
    #[clap(long, default_value_t = false)]
    verbose: bool,

    #[clap(long)]
    #[arg(default_value_t=DEFAULT_LOCAL_ADDRESS.to_string())]
    local_address: String,

    /// Device ip address
    #[clap(long)]
    device: IpAddr,

    #[clap(long, default_value_t = DEFAULT_COMMISSIONING_PORT)]
    commissioning_port: u16,

    #[clap(long, default_value_t = DEFAULT_OPERATIONAL_PORT)]
    operational_port: u16,

    #[clap(long, default_value_t = String::from("20202021"))]
    pin: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read all sensor attributes
    Read {},
    /// Subscribe to sensor attributes and print reports
    Subscribe {
        #[clap(long, default_value_t = 1)]
        min_interval: u16,
        #[clap(long, default_value_t = 10)]
        max_interval: u16,
    },
    /// Provision Wi-Fi network and connect to it
    Wifi { ssid: String, password: String },
}

fn sensor_paths() -> Vec<AttributePath> {
    vec![
        on_off::path(),
        level_control::current_level_path(),
        temperature::measured_value_path(),
        diagnostics::path(diagnostics::ATTR_ID_ACTIVE_FAULTS),
    ]
}

fn print_report(report: &TlvItem) {
    let Some(reports) = report.get_item(&[1]) else {
        println!("empty report");
        return;
    };
    for r in reports.children() {
        if let Some(data) = r.get_item(&[1]) {
            println!(
                "{}/0x{:04x}/0x{:04x} = {:?}",
                data.get_int(&[1, 2]).unwrap_or_default(),
                data.get_int(&[1, 3]).unwrap_or_default(),
                data.get_int(&[1, 4]).unwrap_or_default(),
                data.get(&[2])
            );
        } else if let Some(status) = r.get_item(&[0]) {
            println!(
                "{}/0x{:04x}/0x{:04x} status 0x{:02x}",
                status.get_int(&[0, 2]).unwrap_or_default(),
                status.get_int(&[0, 3]).unwrap_or_default(),
                status.get_int(&[0, 4]).unwrap_or_default(),
                status.get_int(&[1, 0]).unwrap_or_default()
            );
        }
    }
}

/// Networking status of first InvokeResponseIB.
fn networking_status(response: &TlvItem) -> Option<u64> {
    let first = response.get_item(&[1])?.children().first()?;
    first.get_int(&[0, 1, 0])
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = {
        if cli.verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Error
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

    let mut controller = Controller::new(
        &cli.local_address,
        SocketAddr::new(cli.device, cli.commissioning_port),
        SocketAddr::new(cli.device, cli.operational_port),
        cli.pin.as_bytes(),
    )
    .await?;
    controller.commission().await?;
    println!("pase session established");

    match cli.command {
        Commands::Read {} => {
            let report = controller.read(&sensor_paths()).await?;
            print_report(&report);
        }
        Commands::Subscribe {
            min_interval,
            max_interval,
        } => {
            let id = controller
                .subscribe(&sensor_paths(), min_interval, max_interval)
                .await?;
            println!("subscription {}", id);
            loop {
                let wait = Duration::from_secs(max_interval as u64 * 2 + 5);
                let report = controller.recv_report(wait).await?;
                print_report(&report);
            }
        }
        Commands::Wifi { ssid, password } => {
            let res = controller
                .invoke(
                    clusters::ENDPOINT_ROOT,
                    clusters::CLUSTER_ID_NETWORK_COMMISSIONING,
                    network_commissioning::CMD_ID_ADD_OR_UPDATE_WIFI_NETWORK,
                    &[(0, ssid.as_bytes()), (1, password.as_bytes())],
                )
                .await?;
            println!("add network: {:?}", networking_status(&res));
            let res = controller
                .invoke(
                    clusters::ENDPOINT_ROOT,
                    clusters::CLUSTER_ID_NETWORK_COMMISSIONING,
                    network_commissioning::CMD_ID_CONNECT_NETWORK,
                    &[(0, ssid.as_bytes())],
                )
                .await?;
            println!("connect network: {:?}", networking_status(&res));
        }
    }
    Ok(())
}
