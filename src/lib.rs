//! Minimal Matter style device protocol engine for a sensor bridge
//!
//! The device exposes sensor readings as typed attributes and lets a commissioner
//! pair with it over PASE, then read, subscribe and invoke over an encrypted session.
//! Library uses asynchronous Rust and depends on Tokio.
//! Following are main parts of api:
//! - [Device](device::Device) - Protocol coordinator. Owns sessions, commissioning state and subscriptions,
//!                              turns received datagrams into responses and emits subscription reports.
//! - [Transport](transport::Transport) - Commissioning and operational UDP sockets feeding one bounded receive queue.
//! - [AttributeStore](attributes::AttributeStore) - Attribute registry shared between the sensor side and the protocol task.
//! - [bridge](bridge) - Sensor readings and the bounded channel carrying them to the protocol task.
//! - [Storage](storage::Storage) - Trait for persistent key/value storage. [FileStorage](storage::FileStorage)
//!                                 keeps one file per key in a directory.
//! - [TelemetryReporter](telemetry::TelemetryReporter) - JSON over UDP attribute broadcast for dashboards.
//! - [Controller](controller::Controller) - Commissioner side, used by demo commissioner and tests.
//! - [tlv](tlv) - Matter TLV encoder and decoder.
//!
//! Demos directory contains device runner and simple commissioner.
//!
//! Example how to run device with default configuration and feed it sensor readings:
//! ```no_run
//! # use matd::{attributes::AttributeStore, bridge, config::DeviceConfig, device, storage::FileStorage, transport::Transport};
//! # use anyhow::Result;
//! # use std::sync::Arc;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let config = DeviceConfig::default();
//! let storage = Arc::new(FileStorage::new(&config.storage_dir)?);
//! let device = device::Device::new(&config, storage, AttributeStore::new())?;
//! let transport = Transport::new(config.bind_address,
//!                                config.operational_port,
//!                                config.commissioning_port).await?;
//! let (readings, receiver) = bridge::channel();
//! readings.send(bridge::SensorReading { flame_detected: true, fan_speed: 40, temperature: 65,
//!                                       error_code: 0, valid: true });
//! let token = tokio_util::sync::CancellationToken::new();
//! device::run(device, transport, receiver, token).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Example how to commission device and read temperature:
//! ```no_run
//! # use matd::{clusters::temperature, controller::Controller};
//! # use anyhow::Result;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let mut controller = Controller::new("0.0.0.0:0",
//!                                     "192.168.1.50:5550".parse()?,
//!                                     "192.168.1.50:5540".parse()?,
//!                                     b"20202021").await?;
//! controller.commission().await?;
//! let report = controller.read(&[temperature::measured_value_path()]).await?;
//! println!("{:?}", report);
//! # Ok(())
//! # }
//! ```
//!
//!
#![doc = include_str!("../readme.md")]

pub mod attributes;
pub mod bridge;
pub mod clusters;
pub mod commissioning;
pub mod config;
pub mod controller;
pub mod device;
pub mod fabric;
pub mod interaction;
pub mod messages;
pub mod pase;
pub mod session;
pub mod spake2p;
pub mod storage;
pub mod telemetry;
pub mod tlv;
pub mod transport;
mod util;
