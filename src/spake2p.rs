//! SPAKE2+ (P-256) arithmetic used during passcode based session establishment.
//!
//! The device acts as verifier ([Engine::verifier_share], [Engine::verifier_secret]);
//! [Prover] is the commissioner side and is used by tests and the commissioning demo.

use anyhow::Result;
use p256::elliptic_curve::{
    scalar::FromUintUnchecked,
    sec1::{FromEncodedPoint, ToEncodedPoint},
    Curve, Field,
};
use std::ops::Mul;
use zeroize::Zeroize;

use crate::util::cryptoutil;

pub const PBKDF_ITERATIONS: u32 = 2000;
pub const SALT_SIZE: usize = 32;
/// Uncompressed SEC1 point.
pub const POINT_SIZE: usize = 65;
pub const SHARED_SECRET_SIZE: usize = 32;
pub const SESSION_KEY_SALT: &[u8] = b"CHIP PASE Session Keys";
pub const CONFIRMATION_KEY_INFO: &[u8] = b"ConfirmationKeys";

pub struct Engine {
    m: p256::AffinePoint,
    n: p256::AffinePoint,
}

impl Engine {
    fn p256_scalar_from_40_bytes(bytes: &[u8]) -> p256::Scalar {
        let int = crypto_bigint::U320::from_be_slice(bytes);
        let modulo = int.rem(&crypto_bigint::NonZero::from_uint(
            crypto_bigint::U320::from(&p256::NistP256::ORDER),
        ));
        let u256 = crypto_bigint::U256::from(&modulo);
        p256::Scalar::from_uint_unchecked(u256)
    }

    /// Big endian 32 byte value reduced modulo curve order.
    fn p256_scalar_from_32_bytes(bytes: &[u8]) -> p256::Scalar {
        let mut wide = [0u8; 40];
        wide[8..].copy_from_slice(bytes);
        let s = Self::p256_scalar_from_40_bytes(&wide);
        wide.zeroize();
        s
    }

    pub(crate) fn encoded_point_to_projective(e: &p256::EncodedPoint) -> Result<p256::ProjectivePoint> {
        let res = p256::ProjectivePoint::from_encoded_point(e).into_option();
        if let Some(r) = res {
            Ok(r)
        } else {
            Err(anyhow::anyhow!(format!(
                "can't convert point to projective {:?}",
                e
            )))
        }
    }

    /// Parse uncompressed point received from peer.
    pub fn parse_point(data: &[u8]) -> Result<p256::ProjectivePoint> {
        if data.len() != POINT_SIZE {
            anyhow::bail!("point must be {} bytes, got {}", POINT_SIZE, data.len());
        }
        let e = p256::EncodedPoint::from_bytes(data)?;
        Self::encoded_point_to_projective(&e)
    }

    /// PBKDF2 over passcode, split into w0 and w1 (32 bytes each, reduced mod order).
    pub fn derive_w0_w1(
        passcode: &[u8],
        salt: &[u8],
        iterations: u32,
    ) -> (p256::Scalar, p256::Scalar) {
        let mut kdf = [0u8; 64];
        cryptoutil::pbkdf2_sha256(passcode, salt, iterations, &mut kdf);
        let w0 = Self::p256_scalar_from_32_bytes(&kdf[..32]);
        let w1 = Self::p256_scalar_from_32_bytes(&kdf[32..]);
        kdf.zeroize();
        (w0, w1)
    }

    pub fn verifier_point(w1: &p256::Scalar) -> p256::ProjectivePoint {
        p256::ProjectivePoint::GENERATOR.mul(w1)
    }

    /// Returns random y and pB = y*G + w0*N.
    pub fn verifier_share(&self, w0: &p256::Scalar) -> (p256::Scalar, p256::EncodedPoint) {
        let y = p256::Scalar::random(rand::thread_rng());
        let t = p256::ProjectivePoint::GENERATOR.mul(y);
        let pb = self.n.mul(w0).add(&t);
        (y, pb.to_encoded_point(false))
    }

    /// Z = y*(pA - w0*M), returned as x coordinate.
    pub fn verifier_secret(
        &self,
        pa: &p256::ProjectivePoint,
        w0: &p256::Scalar,
        y: &p256::Scalar,
    ) -> Result<[u8; SHARED_SECRET_SIZE]> {
        let wm = self.m.mul(w0).neg();
        let z = pa.add(&wm).mul(y);
        Self::x_coordinate(&z)
    }

    fn x_coordinate(p: &p256::ProjectivePoint) -> Result<[u8; SHARED_SECRET_SIZE]> {
        let enc = p.to_encoded_point(false);
        let x = enc
            .x()
            .ok_or_else(|| anyhow::anyhow!("shared secret is point at infinity"))?;
        let mut out = [0u8; SHARED_SECRET_SIZE];
        out.copy_from_slice(x);
        Ok(out)
    }

    /// First 16 bytes of HKDF(Z.x, "ConfirmationKeys").
    pub fn confirmation_key(z: &[u8]) -> Result<Vec<u8>> {
        let mut okm = cryptoutil::hkdf_sha256(&[], z, CONFIRMATION_KEY_INFO, 32)?;
        let key = okm[..16].to_vec();
        okm.zeroize();
        Ok(key)
    }

    /// cA = HMAC(K, pB)
    pub fn confirmation(z: &[u8], pb: &[u8]) -> Result<Vec<u8>> {
        let mut key = Self::confirmation_key(z)?;
        let ca = cryptoutil::hmac_sha256(pb, &key);
        key.zeroize();
        ca
    }

    pub fn session_key(z: &[u8], session_id: u16) -> Result<Vec<u8>> {
        cryptoutil::hkdf_sha256(
            SESSION_KEY_SALT,
            z,
            &[session_id as u8],
            crate::session::SESSION_KEY_SIZE,
        )
    }

    pub fn new() -> Result<Self> {
        let mhex = "02886e2f97ace46e55ba9dd7242579f2993b64e16ef3dcab95afd497333d8fa12f";
        let mbin = hex::decode(mhex)?;
        let m = p256::EncodedPoint::from_bytes(mbin)?;
        let m = Self::encoded_point_to_projective(&m)?.to_affine();

        let nhex = "03d8bbd6c639c62937b04d997f38c3770719c629d7014d49a24b4f98baa1292b49";
        let nbin = hex::decode(nhex)?;
        let n = p256::EncodedPoint::from_bytes(nbin)?;
        let n = Self::encoded_point_to_projective(&n)?.to_affine();
        Ok(Self { m, n })
    }
}

/// Commissioner side of the exchange.
pub struct Prover {
    w0: p256::Scalar,
    x_random: p256::Scalar,
    pub pa: p256::EncodedPoint,
    z: Option<[u8; SHARED_SECRET_SIZE]>,
}

impl Prover {
    pub fn start(engine: &Engine, passcode: &[u8], salt: &[u8], iterations: u32) -> Self {
        let (w0, _w1) = Engine::derive_w0_w1(passcode, salt, iterations);
        let x_random = p256::Scalar::random(rand::thread_rng());
        let t = p256::ProjectivePoint::GENERATOR.mul(x_random);
        let pa = engine.m.mul(&w0).add(&t).to_encoded_point(false);
        Self {
            w0,
            x_random,
            pa,
            z: None,
        }
    }

    /// Z = x*(pB - w0*N). Returns confirmation value cA to send in pake3.
    pub fn finish(&mut self, engine: &Engine, pb: &[u8]) -> Result<Vec<u8>> {
        let pb_point = Engine::parse_point(pb)?;
        let wn = engine.n.mul(&self.w0).neg();
        let z = pb_point.add(&wn).mul(self.x_random);
        let z = Engine::x_coordinate(&z)?;
        self.z = Some(z);
        Engine::confirmation(&z, pb)
    }

    pub fn session_key(&self, session_id: u16) -> Result<Vec<u8>> {
        match &self.z {
            Some(z) => Engine::session_key(z, session_id),
            None => anyhow::bail!("exchange not finished"),
        }
    }
}

impl Drop for Prover {
    fn drop(&mut self) {
        self.w0 = p256::Scalar::ZERO;
        self.x_random = p256::Scalar::ZERO;
        if let Some(z) = self.z.as_mut() {
            z.zeroize();
        }
    }
}
