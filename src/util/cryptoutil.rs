use aes::cipher::crypto_common;
use anyhow::Result;

use hmac::Mac;
use sha2::{Digest, Sha256};

pub const AES128_KEY_SIZE: usize = 16;
pub const CCM_NONCE_SIZE: usize = 13;
pub const CCM_TAG_SIZE: usize = 16;

pub fn hkdf_sha256(salt: &[u8], secret: &[u8], info: &[u8], size: usize) -> Result<Vec<u8>> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hk = hkdf::Hkdf::<Sha256>::new(salt, secret);
    let mut okm = vec![0u8; size];
    match hk.expand(info, &mut okm) {
        Ok(()) => Ok(okm),
        Err(e) => Err(anyhow::anyhow!(format!("hkdf error {:?}", e))),
    }
}

pub fn hmac_sha256(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if let Ok(mut hm) = hmac::Hmac::<Sha256>::new_from_slice(key) {
        hm.update(data);
        Ok(hm.finalize().into_bytes().to_vec())
    } else {
        Err(anyhow::anyhow!("can't create hmac with key of {} bytes", key.len()))
    }
}

/// Constant time check of an HMAC-SHA256 tag.
pub fn hmac_sha256_verify(data: &[u8], key: &[u8], tag: &[u8]) -> Result<bool> {
    let mut hm = hmac::Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| anyhow::anyhow!("can't create hmac with key of {} bytes", key.len()))?;
    hm.update(data);
    Ok(hm.verify_slice(tag).is_ok())
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) {
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, out);
}

type Aes128Ccm = ccm::Ccm<aes::Aes128, ccm::consts::U16, ccm::consts::U13>;

fn ccm_cipher(key: &[u8], nonce: &[u8]) -> Result<Aes128Ccm> {
    if key.len() != AES128_KEY_SIZE {
        anyhow::bail!("invalid key size {}", key.len());
    }
    if nonce.len() != CCM_NONCE_SIZE {
        anyhow::bail!("invalid nonce size {}", nonce.len());
    }
    let key = crypto_common::generic_array::GenericArray::from_slice(key);
    Ok(<Aes128Ccm as ccm::KeyInit>::new(key))
}

/// Returns ciphertext followed by 16 byte tag.
pub fn aes128_ccm_encrypt(key: &[u8], nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let cipher = ccm_cipher(key, nonce)?;
    match ccm::aead::Aead::encrypt(
        &cipher,
        crypto_common::generic_array::GenericArray::from_slice(nonce),
        ccm::aead::Payload { msg, aad },
    ) {
        Ok(o) => Ok(o),
        Err(e) => Err(anyhow::anyhow!("encrypt error {:?}", e)),
    }
}

pub fn aes128_ccm_decrypt(key: &[u8], nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let cipher = ccm_cipher(key, nonce)?;
    match ccm::aead::Aead::decrypt(
        &cipher,
        crypto_common::generic_array::GenericArray::from_slice(nonce),
        ccm::aead::Payload { msg, aad },
    ) {
        Ok(o) => Ok(o),
        Err(e) => Err(anyhow::anyhow!(format!("decrypt error {:?}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ccm_round_trip_and_tamper() {
        let key = [7u8; 16];
        let nonce = [1u8; 13];
        let ct = aes128_ccm_encrypt(&key, &nonce, &[], b"hello").unwrap();
        assert_eq!(ct.len(), 5 + CCM_TAG_SIZE);
        assert_eq!(aes128_ccm_decrypt(&key, &nonce, &[], &ct).unwrap(), b"hello");

        let mut bad = ct.clone();
        bad[0] ^= 1;
        assert!(aes128_ccm_decrypt(&key, &nonce, &[], &bad).is_err());
        assert!(aes128_ccm_encrypt(&key[..8], &nonce, &[], b"x").is_err());
    }

    #[test]
    fn hmac_verify() {
        let tag = hmac_sha256(b"data", b"key").unwrap();
        assert!(hmac_sha256_verify(b"data", b"key", &tag).unwrap());
        assert!(!hmac_sha256_verify(b"data2", b"key", &tag).unwrap());
        assert_eq!(hkdf_sha256(&[], b"ikm", b"info", 16).unwrap().len(), 16);
    }
}
