//! Commissioning state machine: drives PASE and keeps the persisted fabric table.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::fabric::{Fabric, FabricTable};
use crate::messages::{ProtocolMessageHeader, StatusReportInfo};
use crate::pase::{PaseContext, PaseState};
use crate::session::SessionManager;
use crate::storage::Storage;

pub const DEFAULT_DISCRIMINATOR: u16 = 3840;
pub const PASE_SESSION_ID: u16 = 1;
pub const FABRICS_STORAGE_KEY: &str = "matter_fabrics";
pub const DISCRIMINATOR_STORAGE_KEY: &str = "discriminator";
/// Discriminators generated on first start come from test range 0x0f00..=0x0fff.
pub const DISCRIMINATOR_TEST_MIN: u16 = 0x0f00;
pub const MAX_DISCRIMINATOR: u16 = 0x0fff;

/// Discriminator saved by previous start, or new random one saved for next time.
pub fn load_or_create_discriminator(storage: &dyn Storage) -> Result<u16> {
    if let Some(data) = storage.read(DISCRIMINATOR_STORAGE_KEY)? {
        let bytes: [u8; 2] = data
            .as_slice()
            .try_into()
            .context("stored discriminator must have 2 bytes")?;
        let discriminator = u16::from_le_bytes(bytes);
        if discriminator > MAX_DISCRIMINATOR {
            anyhow::bail!("stored discriminator {} out of range", discriminator);
        }
        log::debug!("loaded discriminator {}", discriminator);
        return Ok(discriminator);
    }
    let discriminator = DISCRIMINATOR_TEST_MIN + rand::random::<u8>() as u16;
    save_discriminator(storage, discriminator)?;
    log::info!("generated discriminator {} (0x{:03x})", discriminator, discriminator);
    Ok(discriminator)
}

pub fn save_discriminator(storage: &dyn Storage, discriminator: u16) -> Result<()> {
    if discriminator > MAX_DISCRIMINATOR {
        anyhow::bail!("discriminator {} exceeds 12 bits", discriminator);
    }
    storage
        .write(DISCRIMINATOR_STORAGE_KEY, &discriminator.to_le_bytes())
        .context("persisting discriminator")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningState {
    Idle,
    PaseStarted,
    Commissioned,
    Error,
}

pub struct CommissioningContext {
    state: CommissioningState,
    discriminator: u16,
    pase: PaseContext,
    fabrics: FabricTable,
    storage: Arc<dyn Storage>,
}

impl CommissioningContext {
    pub fn new(storage: Arc<dyn Storage>) -> Result<Self> {
        Ok(Self {
            state: CommissioningState::Idle,
            discriminator: DEFAULT_DISCRIMINATOR,
            pase: PaseContext::new()?,
            fabrics: FabricTable::new(),
            storage,
        })
    }

    pub fn state(&self) -> CommissioningState {
        self.state
    }

    pub fn discriminator(&self) -> u16 {
        self.discriminator
    }

    pub fn pase_state(&self) -> PaseState {
        self.pase.state()
    }

    pub fn set_verify_confirmation(&mut self, verify: bool) {
        self.pase.set_verify_confirmation(verify);
    }

    /// Open commissioning window with given setup pin.
    pub fn start(&mut self, pin: &str, discriminator: u16) -> Result<()> {
        self.pase.init(pin)?;
        self.discriminator = discriminator;
        self.state = CommissioningState::PaseStarted;
        log::info!("commissioning window open, discriminator {}", discriminator);
        Ok(())
    }

    /// Handle secure channel PASE message. Returns response opcode and payload.
    pub fn handle_pase_message(
        &mut self,
        opcode: u8,
        payload: &[u8],
        sessions: &mut SessionManager,
    ) -> Result<(u8, Vec<u8>)> {
        if self.state != CommissioningState::PaseStarted {
            anyhow::bail!("pase message 0x{:x} in state {:?}", opcode, self.state);
        }
        let res = match opcode {
            ProtocolMessageHeader::OPCODE_PBKDF_REQ => self
                .pase
                .handle_pbkdf_request(payload)
                .map(|r| (ProtocolMessageHeader::OPCODE_PBKDF_RESP, r)),
            ProtocolMessageHeader::OPCODE_PASE_PAKE1 => self
                .pase
                .handle_pake1(payload)
                .map(|r| (ProtocolMessageHeader::OPCODE_PASE_PAKE2, r)),
            ProtocolMessageHeader::OPCODE_PASE_PAKE3 => self.finish_pase(payload, sessions),
            other => Err(anyhow::anyhow!("unexpected pase opcode 0x{:x}", other)),
        };
        if res.is_err() && self.pase.state() == PaseState::Error {
            self.state = CommissioningState::Error;
        }
        res
    }

    fn finish_pase(&mut self, payload: &[u8], sessions: &mut SessionManager) -> Result<(u8, Vec<u8>)> {
        self.pase.handle_pake3(payload)?;
        let mut key = self.pase.derive_session_key(PASE_SESSION_ID)?;
        let created = sessions.create(PASE_SESSION_ID, &key);
        zeroize::Zeroize::zeroize(&mut key);
        self.pase.deinit();
        created.context("installing pase session")?;
        self.state = CommissioningState::Commissioned;
        log::info!("pase session {} established", PASE_SESSION_ID);
        Ok((
            ProtocolMessageHeader::OPCODE_STATUS,
            StatusReportInfo::session_established().encode()?,
        ))
    }

    /// Record fabric of commissioner and persist table.
    pub fn complete(&mut self, fabric_id: u64, vendor_id: u16, root_key: &[u8]) -> Result<()> {
        self.fabrics.add_or_update(fabric_id, vendor_id, root_key)?;
        self.save()?;
        self.state = CommissioningState::Commissioned;
        log::info!("fabric 0x{:x} (vendor 0x{:x}) added", fabric_id, vendor_id);
        Ok(())
    }

    pub fn add_or_update_fabric(&mut self, fabric_id: u64, vendor_id: u16, root_key: &[u8]) -> Result<()> {
        self.fabrics.add_or_update(fabric_id, vendor_id, root_key)
    }

    pub fn remove_fabric(&mut self, fabric_id: u64) -> Result<()> {
        if !self.fabrics.remove(fabric_id) {
            anyhow::bail!("fabric 0x{:x} not found", fabric_id);
        }
        self.save()
    }

    pub fn get_fabric(&self, fabric_id: u64) -> Option<&Fabric> {
        self.fabrics.get(fabric_id)
    }

    pub fn fabric_count(&self) -> usize {
        self.fabrics.count()
    }

    pub fn is_commissioned(&self) -> bool {
        self.fabrics.count() > 0
    }

    pub fn save(&self) -> Result<()> {
        let blob = self.fabrics.encode()?;
        self.storage
            .write(FABRICS_STORAGE_KEY, &blob)
            .context("persisting fabric table")
    }

    /// Load persisted fabrics. Missing blob means empty table.
    pub fn load(&mut self) -> Result<()> {
        let Some(blob) = self.storage.read(FABRICS_STORAGE_KEY)? else {
            log::debug!("no stored fabrics");
            return Ok(());
        };
        self.fabrics = FabricTable::decode(&blob).context("loading fabric table")?;
        if self.is_commissioned() {
            self.state = CommissioningState::Commissioned;
        }
        log::info!("loaded {} fabrics", self.fabrics.count());
        Ok(())
    }

    /// Forget all fabrics and abandon any handshake.
    pub fn reset(&mut self) -> Result<()> {
        self.fabrics.clear();
        self.pase.deinit();
        self.state = CommissioningState::Idle;
        self.save()
    }
}
