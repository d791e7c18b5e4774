use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

use crate::transport::{DEFAULT_COMMISSIONING_PORT, DEFAULT_OPERATIONAL_PORT};

pub const DEFAULT_SETUP_PIN: &str = "20202021";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub bind_address: IpAddr,
    pub operational_port: u16,
    pub commissioning_port: u16,
    /// Explicit pin wins over one derived from `mac_address`.
    pub setup_pin: Option<String>,
    pub mac_address: Option<String>,
    /// None means persisted or newly generated discriminator.
    pub discriminator: Option<u16>,
    pub storage_dir: String,
    pub verify_pake3_confirmation: bool,
    pub telemetry_controllers: Vec<SocketAddr>,
    pub telemetry_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            operational_port: DEFAULT_OPERATIONAL_PORT,
            commissioning_port: DEFAULT_COMMISSIONING_PORT,
            setup_pin: None,
            mac_address: None,
            discriminator: None,
            storage_dir: "./matd-data".to_owned(),
            verify_pake3_confirmation: false,
            telemetry_controllers: Vec::new(),
            telemetry_interval_ms: 0,
        }
    }
}

impl DeviceConfig {
    pub fn load(path: &str) -> Result<Self> {
        let data =
            std::fs::read_to_string(path).context(format!("reading config from {}", path))?;
        let config: Self = serde_json::from_str(&data).context("parsing device config")?;
        config.resolve_setup_pin()?;
        Ok(config)
    }

    /// Configured pin, else pin derived from MAC address, else [DEFAULT_SETUP_PIN].
    pub fn resolve_setup_pin(&self) -> Result<String> {
        let pin = match (&self.setup_pin, &self.mac_address) {
            (Some(pin), _) => pin.clone(),
            (None, Some(mac)) => crate::pase::derive_setup_pin(&crate::pase::parse_mac(mac)?),
            (None, None) => DEFAULT_SETUP_PIN.to_owned(),
        };
        crate::pase::validate_pin(&pin).context("setup_pin")?;
        Ok(pin)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).context(format!("writing config to {}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load() {
        let path = crate::storage::tests::test_path("config");
        std::fs::create_dir_all(&path).unwrap();
        let file = format!("{}/config.json", path);
        let mut config = DeviceConfig::default();
        config.telemetry_controllers.push("192.168.1.10:5600".parse().unwrap());
        config.operational_port = 15540;
        config.save(&file).unwrap();
        assert_eq!(DeviceConfig::load(&file).unwrap(), config);
    }

    #[test]
    fn partial_and_invalid() {
        let path = crate::storage::tests::test_path("config_partial");
        std::fs::create_dir_all(&path).unwrap();
        let file = format!("{}/config.json", path);
        std::fs::write(&file, r#"{"discriminator": 1234}"#).unwrap();
        let config = DeviceConfig::load(&file).unwrap();
        assert_eq!(config.discriminator, Some(1234));
        assert_eq!(config.operational_port, 5540);
        assert_eq!(config.resolve_setup_pin().unwrap(), "20202021");

        std::fs::write(&file, r#"{"setup_pin": "12ab"}"#).unwrap();
        assert!(DeviceConfig::load(&file).is_err());
        assert!(DeviceConfig::load(&format!("{}/missing.json", path)).is_err());
        std::fs::write(&file, r#"{"mac_address": "aa:bb"}"#).unwrap();
        assert!(DeviceConfig::load(&file).is_err());
    }

    #[test]
    fn pin_source_order() {
        let mut config = DeviceConfig {
            mac_address: Some("AA:BB:CC:DD:EE:FF".to_owned()),
            ..Default::default()
        };
        assert_eq!(config.resolve_setup_pin().unwrap(), "82474590");
        config.setup_pin = Some("11223344".to_owned());
        assert_eq!(config.resolve_setup_pin().unwrap(), "11223344");
        config.mac_address = None;
        config.setup_pin = None;
        assert_eq!(config.resolve_setup_pin().unwrap(), DEFAULT_SETUP_PIN);
    }
}
