use anyhow::{Context, Result};
use byteorder::{BigEndian, WriteBytesExt};
use std::time::{Duration, Instant};
use zeroize::Zeroize;

use crate::util::cryptoutil;

pub const MAX_SESSIONS: usize = 5;
pub const SESSION_KEY_SIZE: usize = cryptoutil::AES128_KEY_SIZE;
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(3600);
/// nonce + tag
pub const MIN_ENCRYPTED_SIZE: usize = cryptoutil::CCM_NONCE_SIZE + cryptoutil::CCM_TAG_SIZE;

struct Session {
    session_id: u16,
    key: [u8; SESSION_KEY_SIZE],
    counter: u32,
    last_used: Instant,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Table of established secure sessions with their AES-128-CCM keys.
pub struct SessionManager {
    slots: [Option<Session>; MAX_SESSIONS],
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    fn find(&self, session_id: u16) -> Option<&Session> {
        self.slots
            .iter()
            .flatten()
            .find(|s| s.session_id == session_id)
    }

    fn find_mut(&mut self, session_id: u16) -> Option<&mut Session> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|s| s.session_id == session_id)
    }

    /// Install key for session. Existing session with same id is rekeyed and its counter reset.
    pub fn create(&mut self, session_id: u16, key: &[u8]) -> Result<()> {
        if key.len() != SESSION_KEY_SIZE {
            anyhow::bail!("session key must be {} bytes, got {}", SESSION_KEY_SIZE, key.len());
        }
        if let Some(existing) = self.find_mut(session_id) {
            existing.key.copy_from_slice(key);
            existing.counter = 0;
            existing.last_used = Instant::now();
            log::debug!("session {} rekeyed", session_id);
            return Ok(());
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .context("session table full")?;
        let mut k = [0u8; SESSION_KEY_SIZE];
        k.copy_from_slice(key);
        *slot = Some(Session {
            session_id,
            key: k,
            counter: 0,
            last_used: Instant::now(),
        });
        log::debug!("session {} created", session_id);
        Ok(())
    }

    pub fn destroy(&mut self, session_id: u16) {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|s| s.session_id == session_id) {
                // key is zeroized by drop
                *slot = None;
                log::debug!("session {} destroyed", session_id);
            }
        }
    }

    fn make_nonce(session_id: u16, counter: u32) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(cryptoutil::CCM_NONCE_SIZE);
        out.write_u16::<BigEndian>(session_id)?;
        out.write_u32::<BigEndian>(counter)?;
        out.resize(cryptoutil::CCM_NONCE_SIZE, 0);
        Ok(out)
    }

    /// Encrypt under session key. Output is nonce || ciphertext || tag.
    pub fn encrypt(&mut self, session_id: u16, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_with_aad(session_id, &[], plaintext)
    }

    /// Same as [SessionManager::encrypt], `aad` (the encoded message header) is
    /// authenticated but not carried in the output.
    pub fn encrypt_with_aad(&mut self, session_id: u16, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let session = self
            .find_mut(session_id)
            .context(format!("unknown session {}", session_id))?;
        let nonce = Self::make_nonce(session_id, session.counter)?;
        let enc = cryptoutil::aes128_ccm_encrypt(&session.key, &nonce, aad, plaintext)?;
        session.counter = session.counter.wrapping_add(1);
        session.last_used = Instant::now();
        let mut out = nonce;
        out.extend_from_slice(&enc);
        Ok(out)
    }

    pub fn decrypt(&mut self, session_id: u16, data: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_with_aad(session_id, &[], data)
    }

    /// Fails when `aad` differs from what the sender authenticated.
    pub fn decrypt_with_aad(&mut self, session_id: u16, aad: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < MIN_ENCRYPTED_SIZE {
            anyhow::bail!("encrypted payload too short ({} bytes)", data.len());
        }
        let session = self
            .find_mut(session_id)
            .context(format!("unknown session {}", session_id))?;
        let (nonce, ct) = data.split_at(cryptoutil::CCM_NONCE_SIZE);
        let plain = cryptoutil::aes128_ccm_decrypt(&session.key, nonce, aad, ct)
            .context(format!("authentication failed for session {}", session_id))?;
        session.last_used = Instant::now();
        Ok(plain)
    }

    pub fn is_active(&self, session_id: u16) -> bool {
        self.find(session_id).is_some()
    }

    pub fn message_counter(&self, session_id: u16) -> Option<u32> {
        self.find(session_id).map(|s| s.counter)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn cleanup_expired(&mut self) -> Vec<u16> {
        self.cleanup_expired_at(Instant::now())
    }

    /// Destroy sessions idle longer than [SESSION_TIMEOUT], returns their ids.
    pub fn cleanup_expired_at(&mut self, now: Instant) -> Vec<u16> {
        let mut expired = Vec::new();
        for slot in self.slots.iter_mut() {
            let stale = slot
                .as_ref()
                .is_some_and(|s| now.saturating_duration_since(s.last_used) > SESSION_TIMEOUT);
            if stale {
                if let Some(s) = slot.take() {
                    log::info!("session {} expired", s.session_id);
                    expired.push(s.session_id);
                }
            }
        }
        expired
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let mut sm = SessionManager::new();
        sm.create(1, &[0x11; 16]).unwrap();
        sm.create(2, &[0x22; 16]).unwrap();

        let a = sm.encrypt(1, b"attribute report").unwrap();
        assert_eq!(a.len(), MIN_ENCRYPTED_SIZE + 16);
        assert_eq!(&a[..6], &[0, 1, 0, 0, 0, 0]);
        assert_eq!(sm.message_counter(1), Some(1));
        let b = sm.encrypt(1, b"attribute report").unwrap();
        assert_eq!(&b[..6], &[0, 1, 0, 0, 0, 1]);
        assert_ne!(a, b);
        assert_eq!(sm.message_counter(1), Some(2));

        assert_eq!(sm.decrypt(1, &a).unwrap(), b"attribute report");
        assert!(sm.decrypt(2, &a).is_err());
        assert!(sm.decrypt(3, &a).is_err());
        assert!(sm.decrypt(1, &a[..MIN_ENCRYPTED_SIZE - 1]).is_err());
    }

    #[test]
    fn header_bound_as_aad() {
        let mut sm = SessionManager::new();
        sm.create(1, &[0x11; 16]).unwrap();
        let header = [0u8, 1, 0, 0, 5, 0, 0, 0];
        let enc = sm.encrypt_with_aad(1, &header, b"invoke").unwrap();
        assert_eq!(sm.decrypt_with_aad(1, &header, &enc).unwrap(), b"invoke");

        let mut forged = header;
        forged[4..8].copy_from_slice(&0x7fff0000u32.to_le_bytes());
        assert!(sm.decrypt_with_aad(1, &forged, &enc).is_err());
        assert!(sm.decrypt(1, &enc).is_err());
    }

    #[test]
    fn create_validates_and_rekeys() {
        let mut sm = SessionManager::new();
        assert!(sm.create(1, &[0; 15]).is_err());
        sm.create(1, &[1; 16]).unwrap();
        sm.encrypt(1, b"x").unwrap();
        sm.create(1, &[2; 16]).unwrap();
        assert_eq!(sm.message_counter(1), Some(0));
        assert_eq!(sm.active_count(), 1);

        for id in 2..=MAX_SESSIONS as u16 {
            sm.create(id, &[3; 16]).unwrap();
        }
        assert!(sm.create(100, &[3; 16]).is_err());
        assert_eq!(sm.active_count(), MAX_SESSIONS);

        sm.destroy(3);
        assert!(!sm.is_active(3));
        assert!(sm.encrypt(3, b"x").is_err());
        sm.create(100, &[3; 16]).unwrap();
    }

    #[test]
    fn idle_sessions_expire() {
        let mut sm = SessionManager::new();
        sm.create(1, &[1; 16]).unwrap();
        sm.create(2, &[2; 16]).unwrap();
        let now = Instant::now();
        assert!(sm.cleanup_expired_at(now).is_empty());
        let later = now + SESSION_TIMEOUT + Duration::from_secs(1);
        let mut expired = sm.cleanup_expired_at(later);
        expired.sort();
        assert_eq!(expired, vec![1, 2]);
        assert_eq!(sm.active_count(), 0);
    }
}
