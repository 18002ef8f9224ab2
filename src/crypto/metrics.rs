//! Additively homomorphic metric cipher
//!
//! Analytics-tier uploads carry per-entry word counts and sentiment scores
//! encrypted so the server can sum them without seeing individual values.
//! Ciphertexts are additive masks modulo 2^61: `c = (v + mask) mod M` where
//! the mask is an HMAC-SHA256 PRF of (record id, metric kind) under a secret
//! key. Sums of ciphertexts decrypt by subtracting the sum of masks. The
//! public context (modulus + key commitment) is pushed to the server with the
//! privacy tier so aggregates stay verifiable across devices.

use ring::digest::{digest, SHA256};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use super::{encode_base64, CryptoError};

/// Modulus for the additive group. Fits comfortably in u64 with headroom for
/// summing millions of entries before wraparound.
pub const MASK_MODULUS: u64 = 1 << 61;

/// Fixed-point scale applied to sentiment scores before encryption.
pub const SENTIMENT_SCALE: f64 = 1000.0;

/// Which per-entry metric a ciphertext encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    WordCount,
    Sentiment,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::WordCount => "word_count",
            MetricKind::Sentiment => "sentiment",
        }
    }
}

/// Secret-key metric cipher. Treated as a black box by the sync engine.
pub struct MetricCipher {
    key: hmac::Key,
    key_bytes: [u8; 32],
}

impl MetricCipher {
    /// Generate a fresh random masking key.
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes)
            .map_err(|_| CryptoError::KeyGeneration)?;
        Ok(Self::from_key_bytes(key_bytes))
    }

    /// Restore a cipher from exported key bytes.
    pub fn from_key_bytes(key_bytes: [u8; 32]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, &key_bytes),
            key_bytes,
        }
    }

    /// Public parameters: modulus and a commitment to the key, base64-encoded.
    /// Safe to share; the commitment reveals nothing about the key itself.
    pub fn public_context(&self) -> String {
        let commitment = digest(&SHA256, &self.key_bytes);
        let params = serde_json::json!({
            "scheme": "additive-mask-v1",
            "modulus": MASK_MODULUS,
            "commitment": hex::encode(commitment.as_ref()),
        });
        encode_base64(params.to_string().as_bytes())
    }

    fn mask(&self, record_id: &str, kind: MetricKind) -> u64 {
        let label = format!("{record_id}\u{1f}{}", kind.as_str());
        let tag = hmac::sign(&self.key, label.as_bytes());
        let mut first = [0u8; 8];
        first.copy_from_slice(&tag.as_ref()[..8]);
        u64::from_be_bytes(first) % MASK_MODULUS
    }

    /// Encrypt a signed metric value for one record.
    pub fn encrypt(&self, record_id: &str, kind: MetricKind, value: i64) -> String {
        let reduced = (value as i128).rem_euclid(MASK_MODULUS as i128) as u64;
        let ciphertext = reduced.wrapping_add(self.mask(record_id, kind)) % MASK_MODULUS;
        encode_base64(&ciphertext.to_be_bytes())
    }

    /// Decrypt a single-record ciphertext back to its signed value.
    pub fn decrypt(
        &self,
        record_id: &str,
        kind: MetricKind,
        ciphertext: &str,
    ) -> Result<i64, CryptoError> {
        let raw = decode_ciphertext(ciphertext)?;
        let mask = self.mask(record_id, kind);
        Ok(to_signed((raw + MASK_MODULUS - mask) % MASK_MODULUS))
    }

    /// Decrypt a server-side sum of ciphertexts, given the record ids that
    /// contributed to it.
    pub fn decrypt_sum(
        &self,
        contributors: &[(&str, MetricKind)],
        sum_ciphertext: &str,
    ) -> Result<i64, CryptoError> {
        let raw = decode_ciphertext(sum_ciphertext)?;
        let mut mask_sum: u64 = 0;
        for (record_id, kind) in contributors {
            mask_sum = (mask_sum + self.mask(record_id, *kind)) % MASK_MODULUS;
        }
        Ok(to_signed((raw + MASK_MODULUS - mask_sum) % MASK_MODULUS))
    }
}

/// Homomorphic addition of two ciphertexts (what the server does).
pub fn add_ciphertexts(a: &str, b: &str) -> Result<String, CryptoError> {
    let (a, b) = (decode_ciphertext(a)?, decode_ciphertext(b)?);
    Ok(encode_base64(&((a + b) % MASK_MODULUS).to_be_bytes()))
}

fn decode_ciphertext(raw: &str) -> Result<u64, CryptoError> {
    let bytes = super::decode_base64(raw)?;
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidEncoding("metric ciphertext must be 8 bytes".to_string()))?;
    Ok(u64::from_be_bytes(arr) % MASK_MODULUS)
}

/// Values above M/2 are negatives wrapped into the group.
fn to_signed(v: u64) -> i64 {
    if v > MASK_MODULUS / 2 {
        (v as i128 - MASK_MODULUS as i128) as i64
    } else {
        v as i64
    }
}

// ============================================================================
// Tests
// ============================================================================
