//! Passcode authenticated session establishment, device (verifier) side.

use anyhow::{Context, Result};
use rand::RngCore;
use zeroize::Zeroize;

use crate::spake2p::{self, Engine};
use crate::tlv;
use crate::util::cryptoutil;

pub const PIN_LENGTH: usize = 8;
/// Mixed with the MAC address so other products get different pins from same hardware.
pub const PIN_DERIVATION_SALT: &[u8] = b"VIKINGBIO-2026";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaseState {
    Idle,
    Initialized,
    PbkdfResponseSent,
    Pake2Sent,
    Completed,
    Error,
}

pub struct PaseContext {
    engine: Engine,
    state: PaseState,
    verify_confirmation: bool,
    pin: [u8; PIN_LENGTH],
    salt: [u8; spake2p::SALT_SIZE],
    iterations: u32,
    w0: p256::Scalar,
    w1: p256::Scalar,
    l: Option<p256::ProjectivePoint>,
    pa: Option<p256::EncodedPoint>,
    pb: Option<p256::EncodedPoint>,
    z: Option<[u8; spake2p::SHARED_SECRET_SIZE]>,
}

pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() != PIN_LENGTH || !pin.bytes().all(|b| b.is_ascii_digit()) {
        anyhow::bail!("setup pin must be exactly {} digits", PIN_LENGTH);
    }
    Ok(())
}

/// Setup pin derived from MAC address: first four bytes of SHA256(mac | salt)
/// as big endian number, reduced to eight decimal digits.
pub fn derive_setup_pin(mac: &[u8; 6]) -> String {
    let mut input = mac.to_vec();
    input.extend_from_slice(PIN_DERIVATION_SALT);
    let hash = cryptoutil::sha256(&input);
    let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
    format!("{:08}", value % 100_000_000)
}

/// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` or plain twelve hex digits.
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let digits: String = mac.chars().filter(|c| !matches!(c, ':' | '-' | ' ')).collect();
    let bytes = hex::decode(&digits).context(format!("invalid mac address {:?}", mac))?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("mac address {:?} must have 6 bytes", mac))
}

impl PaseContext {
    pub fn new() -> Result<Self> {
        Ok(Self {
            engine: Engine::new()?,
            state: PaseState::Idle,
            verify_confirmation: false,
            pin: [0; PIN_LENGTH],
            salt: [0; spake2p::SALT_SIZE],
            iterations: spake2p::PBKDF_ITERATIONS,
            w0: p256::Scalar::ZERO,
            w1: p256::Scalar::ZERO,
            l: None,
            pa: None,
            pb: None,
            z: None,
        })
    }

    pub fn state(&self) -> PaseState {
        self.state
    }

    /// When enabled pake3 must carry HMAC(K, pB), otherwise any confirmation is accepted.
    pub fn set_verify_confirmation(&mut self, verify: bool) {
        self.verify_confirmation = verify;
    }

    fn expect_state(&self, expected: PaseState, step: &str) -> Result<()> {
        if self.state != expected {
            anyhow::bail!(
                "{} not allowed in state {:?} (expected {:?})",
                step,
                self.state,
                expected
            );
        }
        Ok(())
    }

    fn wipe(&mut self) {
        self.pin.zeroize();
        self.salt.zeroize();
        self.w0 = p256::Scalar::ZERO;
        self.w1 = p256::Scalar::ZERO;
        self.l = None;
        self.pa = None;
        self.pb = None;
        if let Some(z) = self.z.as_mut() {
            z.zeroize();
        }
        self.z = None;
    }

    fn fail(&mut self, err: anyhow::Error) -> anyhow::Error {
        log::warn!("pase failed: {:#}", err);
        self.wipe();
        self.state = PaseState::Error;
        err
    }

    /// Start new exchange, replacing any previous one.
    pub fn init(&mut self, pin: &str) -> Result<()> {
        validate_pin(pin)?;
        self.wipe();
        self.pin.copy_from_slice(pin.as_bytes());
        self.state = PaseState::Initialized;
        Ok(())
    }

    /// Returns PBKDF parameter response: {1: iterations, 2: salt}.
    pub fn handle_pbkdf_request(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.expect_state(PaseState::Initialized, "pbkdf request")?;
        log::trace!("pbkdf param request ({} bytes)", request.len());
        rand::thread_rng().fill_bytes(&mut self.salt);
        let (w0, w1) = Engine::derive_w0_w1(&self.pin, &self.salt, self.iterations);
        self.w0 = w0;
        self.w1 = w1;
        self.l = Some(Engine::verifier_point(&self.w1));

        let mut tlv = tlv::TlvWriter::new();
        tlv.start_struct(tlv::Tag::Anonymous)?;
        tlv.write_uint(1, self.iterations as u64)?;
        tlv.write_bytes(2, &self.salt)?;
        tlv.end_container()?;
        self.state = PaseState::PbkdfResponseSent;
        Ok(tlv.into_vec())
    }

    /// Consumes pA, returns pB.
    pub fn handle_pake1(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.expect_state(PaseState::PbkdfResponseSent, "pake1")?;
        let pa = match Engine::parse_point(request) {
            Ok(p) => p,
            Err(e) => return Err(self.fail(e.context("invalid pA"))),
        };
        let (y, pb) = self.engine.verifier_share(&self.w0);
        let z = match self.engine.verifier_secret(&pa, &self.w0, &y) {
            Ok(z) => z,
            Err(e) => return Err(self.fail(e)),
        };
        self.pa = p256::EncodedPoint::from_bytes(request).ok();
        self.z = Some(z);
        let out = pb.as_bytes().to_vec();
        self.pb = Some(pb);
        self.state = PaseState::Pake2Sent;
        Ok(out)
    }

    pub fn handle_pake3(&mut self, request: &[u8]) -> Result<()> {
        self.expect_state(PaseState::Pake2Sent, "pake3")?;
        if self.verify_confirmation {
            let check = match (&self.z, &self.pb) {
                (Some(z), Some(pb)) => Engine::confirmation_key(z).and_then(|mut key| {
                    let r = crate::util::cryptoutil::hmac_sha256_verify(pb.as_bytes(), &key, request);
                    key.zeroize();
                    r
                }),
                _ => Err(anyhow::anyhow!("missing exchange state")),
            };
            match check {
                Ok(true) => {}
                Ok(false) => return Err(self.fail(anyhow::anyhow!("pake3 confirmation mismatch"))),
                Err(e) => return Err(self.fail(e)),
            }
        }
        self.state = PaseState::Completed;
        log::info!("pase exchange completed");
        Ok(())
    }

    pub fn derive_session_key(&self, session_id: u16) -> Result<Vec<u8>> {
        self.expect_state(PaseState::Completed, "session key derivation")?;
        let z = self.z.as_ref().context("shared secret missing")?;
        Engine::session_key(z, session_id)
    }

    /// Wipe all secrets and return to idle.
    pub fn deinit(&mut self) {
        self.wipe();
        self.state = PaseState::Idle;
    }
}

impl Drop for PaseContext {
    fn drop(&mut self) {
        self.wipe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spake2p::Prover;

    fn salt_and_iterations(resp: &[u8]) -> (Vec<u8>, u32) {
        let t = tlv::decode_tlv(resp).unwrap();
        (
            t.get_octet_string(&[2]).unwrap().to_vec(),
            t.get_u32(&[1]).unwrap(),
        )
    }

    #[test]
    fn pin_validation() {
        let mut p = PaseContext::new().unwrap();
        assert!(p.init("1234567").is_err());
        assert!(p.init("1234567a").is_err());
        assert!(p.init("123456789").is_err());
        assert_eq!(p.state(), PaseState::Idle);
        p.init("20202021").unwrap();
        assert_eq!(p.state(), PaseState::Initialized);
    }

    #[test]
    fn pin_from_mac() {
        assert_eq!(derive_setup_pin(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]), "82474590");
        assert_eq!(derive_setup_pin(&[0x28, 0xcd, 0xc1, 0x00, 0x11, 0x22]), "78965385");
        // leading zeros kept
        assert_eq!(derive_setup_pin(&[0; 6]), "04954742");
        validate_pin(&derive_setup_pin(&[1, 2, 3, 4, 5, 6])).unwrap();

        assert_eq!(parse_mac("AA:BB:CC:DD:EE:FF").unwrap(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(parse_mac("28-cd-c1-00-11-22").unwrap(), [0x28, 0xcd, 0xc1, 0x00, 0x11, 0x22]);
        assert_eq!(parse_mac("000000000000").unwrap(), [0; 6]);
        assert!(parse_mac("aa:bb:cc").is_err());
        assert!(parse_mac("zz:bb:cc:dd:ee:ff").is_err());
    }

    #[test]
    fn full_exchange_derives_matching_key() {
        let mut p = PaseContext::new().unwrap();
        p.set_verify_confirmation(true);
        p.init("20202021").unwrap();
        assert!(p.derive_session_key(1).is_err());

        let resp = p.handle_pbkdf_request(&[]).unwrap();
        let (salt, iterations) = salt_and_iterations(&resp);
        assert_eq!(salt.len(), 32);
        assert_eq!(iterations, spake2p::PBKDF_ITERATIONS);

        let engine = Engine::new().unwrap();
        let mut prover = Prover::start(&engine, b"20202021", &salt, iterations);
        let pb = p.handle_pake1(prover.pa.as_bytes()).unwrap();
        assert_eq!(pb.len(), 65);
        assert_eq!(p.state(), PaseState::Pake2Sent);
        let ca = prover.finish(&engine, &pb).unwrap();
        p.handle_pake3(&ca).unwrap();
        assert_eq!(p.state(), PaseState::Completed);

        let key = p.derive_session_key(1).unwrap();
        assert_eq!(key.len(), 16);
        assert!(key.iter().any(|b| *b != 0));
        assert_eq!(key, prover.session_key(1).unwrap());

        p.deinit();
        assert_eq!(p.state(), PaseState::Idle);
        assert!(p.derive_session_key(1).is_err());
    }

    #[test]
    fn out_of_order_calls_keep_state() {
        let mut p = PaseContext::new().unwrap();
        assert!(p.handle_pake1(&[4; 65]).is_err());
        assert_eq!(p.state(), PaseState::Idle);
        p.init("20202021").unwrap();
        assert!(p.handle_pake1(&[4; 65]).is_err());
        assert!(p.handle_pake3(&[0; 32]).is_err());
        assert_eq!(p.state(), PaseState::Initialized);
        p.handle_pbkdf_request(&[]).unwrap();
        assert!(p.handle_pbkdf_request(&[]).is_err());
        assert_eq!(p.state(), PaseState::PbkdfResponseSent);
    }

    #[test]
    fn invalid_point_moves_to_error() {
        let mut p = PaseContext::new().unwrap();
        p.init("20202021").unwrap();
        p.handle_pbkdf_request(&[]).unwrap();
        assert!(p.handle_pake1(&[4; 10]).is_err());
        assert_eq!(p.state(), PaseState::Error);
        assert!(p.derive_session_key(1).is_err());
    }

    #[test]
    fn confirmation_mismatch_when_verifying() {
        let mut p = PaseContext::new().unwrap();
        p.set_verify_confirmation(true);
        p.init("20202021").unwrap();
        let resp = p.handle_pbkdf_request(&[]).unwrap();
        let (salt, iterations) = salt_and_iterations(&resp);
        let engine = Engine::new().unwrap();
        let prover = Prover::start(&engine, b"11112222", &salt, iterations);
        p.handle_pake1(prover.pa.as_bytes()).unwrap();
        assert!(p.handle_pake3(&[0u8; 32]).is_err());
        assert_eq!(p.state(), PaseState::Error);
    }

    #[test]
    fn unverified_confirmation_is_accepted() {
        let mut p = PaseContext::new().unwrap();
        p.init("20202021").unwrap();
        let resp = p.handle_pbkdf_request(&[]).unwrap();
        let (salt, iterations) = salt_and_iterations(&resp);
        let engine = Engine::new().unwrap();
        let prover = Prover::start(&engine, b"20202021", &salt, iterations);
        p.handle_pake1(prover.pa.as_bytes()).unwrap();
        p.handle_pake3(&[]).unwrap();
        assert_eq!(p.state(), PaseState::Completed);
    }
}
