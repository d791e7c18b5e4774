//! Wi-Fi network commissioning cluster (endpoint 0).

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::ClusterValue;
use crate::interaction::StatusCode;
use crate::storage::Storage;
use crate::tlv::TlvItem;

pub const ATTR_ID_MAX_NETWORKS: u32 = 0x0000;
pub const ATTR_ID_NETWORKS: u32 = 0x0001;
pub const ATTR_ID_SCAN_MAX_TIME_SECONDS: u32 = 0x0002;
pub const ATTR_ID_CONNECT_MAX_TIME_SECONDS: u32 = 0x0003;
pub const ATTR_ID_INTERFACE_ENABLED: u32 = 0x0004;
pub const ATTR_ID_LAST_NETWORKING_STATUS: u32 = 0x0005;
pub const ATTR_ID_LAST_NETWORK_ID: u32 = 0x0006;
pub const ATTR_ID_LAST_CONNECT_ERROR_VALUE: u32 = 0x0007;

pub const CMD_ID_ADD_OR_UPDATE_WIFI_NETWORK: u32 = 0x02;
pub const CMD_ID_NETWORK_CONFIG_RESPONSE: u32 = 0x05;
pub const CMD_ID_CONNECT_NETWORK: u32 = 0x06;
pub const CMD_ID_CONNECT_NETWORK_RESPONSE: u32 = 0x07;

pub const MAX_NETWORKS: u8 = 1;
pub const SCAN_MAX_TIME_SECONDS: u8 = 30;
pub const CONNECT_MAX_TIME_SECONDS: u8 = 30;
pub const MAX_SSID_LEN: usize = 32;
pub const MAX_CREDENTIALS_LEN: usize = 64;

pub const WIFI_CREDENTIALS_STORAGE_KEY: &str = "wifi_credentials";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkingStatus {
    Success = 0,
    OutOfRange = 1,
    BoundsExceeded = 2,
    NetworkIdNotFound = 3,
    DuplicateNetworkId = 4,
    NetworkNotFound = 5,
    RegulatoryError = 6,
    AuthFailure = 7,
    UnsupportedSecurity = 8,
    OtherConnectionFailure = 9,
    Ipv6Failed = 10,
    IpBindFailed = 11,
    UnknownError = 12,
}

/// Platform side of network commissioning.
pub trait NetworkBackend: Send {
    fn save_credentials(&mut self, ssid: &[u8], credentials: &[u8]) -> Result<()>;
    /// Connect using previously saved credentials.
    fn connect(&mut self, network_id: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WifiCredentials {
    /// hex
    ssid: String,
    /// hex
    credentials: String,
}

/// Backend which only records credentials in [Storage]. Connecting succeeds
/// when credentials for the requested network were saved before.
pub struct StorageNetworkBackend {
    storage: Arc<dyn Storage>,
}

impl StorageNetworkBackend {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn load(&self) -> Result<Option<WifiCredentials>> {
        let Some(data) = self.storage.read(WIFI_CREDENTIALS_STORAGE_KEY)? else {
            return Ok(None);
        };
        let creds = serde_json::from_slice(&data).context("parsing stored wifi credentials")?;
        Ok(Some(creds))
    }
}

impl NetworkBackend for StorageNetworkBackend {
    fn save_credentials(&mut self, ssid: &[u8], credentials: &[u8]) -> Result<()> {
        let creds = WifiCredentials {
            ssid: hex::encode(ssid),
            credentials: hex::encode(credentials),
        };
        let data = serde_json::to_vec(&creds)?;
        self.storage.write(WIFI_CREDENTIALS_STORAGE_KEY, &data)
    }

    fn connect(&mut self, network_id: &[u8]) -> Result<()> {
        let creds = self.load()?.context("no wifi credentials stored")?;
        if creds.ssid != hex::encode(network_id) {
            anyhow::bail!(
                "no credentials for network {}",
                String::from_utf8_lossy(network_id)
            );
        }
        log::info!("connecting to {}", String::from_utf8_lossy(network_id));
        Ok(())
    }
}

pub struct NetworkCommissioning {
    backend: Box<dyn NetworkBackend>,
    interface_enabled: bool,
    connected: bool,
    last_status: NetworkingStatus,
    last_network_id: Vec<u8>,
}

impl NetworkCommissioning {
    pub fn new(backend: Box<dyn NetworkBackend>) -> Self {
        Self {
            backend,
            interface_enabled: true,
            connected: false,
            last_status: NetworkingStatus::Success,
            last_network_id: Vec::new(),
        }
    }

    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        Self::new(Box::new(StorageNetworkBackend::new(storage)))
    }

    pub fn last_status(&self) -> NetworkingStatus {
        self.last_status
    }

    pub fn read(&self, attribute: u32) -> Result<ClusterValue, StatusCode> {
        match attribute {
            ATTR_ID_MAX_NETWORKS => Ok(ClusterValue::UInt(MAX_NETWORKS as u64)),
            ATTR_ID_NETWORKS => {
                if self.last_network_id.is_empty() {
                    return Ok(ClusterValue::Array(Vec::new()));
                }
                // NetworkInfoStruct {0: network id, 1: connected}
                Ok(ClusterValue::Array(vec![ClusterValue::Struct(vec![
                    (0, ClusterValue::Bytes(self.last_network_id.clone())),
                    (1, ClusterValue::Bool(self.connected)),
                ])]))
            }
            ATTR_ID_SCAN_MAX_TIME_SECONDS => Ok(ClusterValue::UInt(SCAN_MAX_TIME_SECONDS as u64)),
            ATTR_ID_CONNECT_MAX_TIME_SECONDS => {
                Ok(ClusterValue::UInt(CONNECT_MAX_TIME_SECONDS as u64))
            }
            ATTR_ID_INTERFACE_ENABLED => Ok(ClusterValue::Bool(self.interface_enabled)),
            ATTR_ID_LAST_NETWORKING_STATUS => Ok(ClusterValue::UInt(self.last_status as u64)),
            ATTR_ID_LAST_NETWORK_ID => Ok(ClusterValue::Bytes(self.last_network_id.clone())),
            ATTR_ID_LAST_CONNECT_ERROR_VALUE => Ok(ClusterValue::Int(0)),
            _ => Err(StatusCode::UnsupportedAttribute),
        }
    }

    pub fn add_or_update_wifi(&mut self, ssid: &[u8], credentials: &[u8]) -> NetworkingStatus {
        if ssid.is_empty() || ssid.len() > MAX_SSID_LEN || credentials.len() > MAX_CREDENTIALS_LEN {
            log::warn!(
                "wifi network rejected: ssid {} bytes, credentials {} bytes",
                ssid.len(),
                credentials.len()
            );
            self.last_status = NetworkingStatus::OutOfRange;
            return self.last_status;
        }
        if let Err(e) = self.backend.save_credentials(ssid, credentials) {
            log::error!("can't save wifi credentials: {:#}", e);
            self.last_status = NetworkingStatus::OtherConnectionFailure;
            return self.last_status;
        }
        self.last_network_id = ssid.to_vec();
        self.connected = false;
        self.last_status = NetworkingStatus::Success;
        log::info!("wifi network {} saved", String::from_utf8_lossy(ssid));
        self.last_status
    }

    pub fn connect_network(&mut self, network_id: &[u8]) -> NetworkingStatus {
        if network_id.is_empty() || network_id.len() > MAX_SSID_LEN {
            self.last_status = NetworkingStatus::OutOfRange;
            return self.last_status;
        }
        if let Err(e) = self.backend.connect(network_id) {
            log::warn!("connect failed: {:#}", e);
            self.connected = false;
            self.last_status = NetworkingStatus::OtherConnectionFailure;
            return self.last_status;
        }
        self.last_network_id = network_id.to_vec();
        self.connected = true;
        self.last_status = NetworkingStatus::Success;
        self.last_status
    }

    /// Execute command. Returns response command id and networking status.
    pub fn invoke(&mut self, command: u32, fields: Option<&TlvItem>) -> Result<(u32, NetworkingStatus), StatusCode> {
        match command {
            CMD_ID_ADD_OR_UPDATE_WIFI_NETWORK => {
                let fields = fields.ok_or(StatusCode::InvalidCommand)?;
                let ssid = fields.get_octet_string(&[0]).ok_or(StatusCode::InvalidCommand)?;
                let credentials = fields.get_octet_string(&[1]).unwrap_or(&[]);
                Ok((
                    CMD_ID_NETWORK_CONFIG_RESPONSE,
                    self.add_or_update_wifi(ssid, credentials),
                ))
            }
            CMD_ID_CONNECT_NETWORK => {
                let fields = fields.ok_or(StatusCode::InvalidCommand)?;
                let id = fields.get_octet_string(&[0]).ok_or(StatusCode::InvalidCommand)?;
                Ok((CMD_ID_CONNECT_NETWORK_RESPONSE, self.connect_network(id)))
            }
            _ => Err(StatusCode::UnsupportedCommand),
        }
    }
}
