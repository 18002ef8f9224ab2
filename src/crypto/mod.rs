//! Crypto provider for Lumen Journal
//!
//! Symmetric authenticated encryption for entry content (AES-256-GCM) and the
//! additively homomorphic metric cipher used for analytics-tier uploads.
//! Keys live behind a [`KeyManager`]: generate -> load-on-start ->
//! delete-on-demand. Components read keys through the manager on every use so
//! nothing survives `delete_all_keys`.

pub mod metrics;

use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::{Arc, RwLock};
use zeroize::Zeroize;

pub use metrics::{MetricCipher, MetricKind, SENTIMENT_SCALE};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Key generation failed")]
    KeyGeneration,

    #[error("No symmetric key available")]
    MissingKey,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed - invalid key or corrupted data")]
    Decryption,

    #[error("Missing authentication tag")]
    MissingTag,

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
}

/// 256-bit symmetric key, wiped from memory on drop.
pub struct SymmetricKey([u8; KEY_LEN]);

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; KEY_LEN];
        rng.fill(&mut bytes).map_err(|_| CryptoError::KeyGeneration)?;
        Ok(Self(bytes))
    }

    /// Restore a key from its base64 export.
    pub fn from_base64(raw: &str) -> Result<Self, CryptoError> {
        let bytes = decode_base64(raw)?;
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidEncoding("key must be 32 bytes".to_string()))?;
        Ok(Self(arr))
    }

    /// Base64 export for the platform keychain layer.
    pub fn to_base64(&self) -> String {
        encode_base64(&self.0)
    }
}

/// Entry content after symmetric encryption, all fields base64.
/// The authentication tag is kept separate from the ciphertext so a missing
/// tag is detectable rather than silently producing garbage.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EncryptedContent {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

/// Encrypt plaintext with AES-256-GCM under a random nonce.
pub fn encrypt_content(key: &SymmetricKey, plaintext: &str) -> Result<EncryptedContent, CryptoError> {
    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|e| CryptoError::Encryption(format!("RNG error: {e:?}")))?;

    let unbound = UnboundKey::new(&AES_256_GCM, &key.0)
        .map_err(|e| CryptoError::Encryption(format!("Key error: {e:?}")))?;
    let sealing = LessSafeKey::new(unbound);

    let mut buf = plaintext.as_bytes().to_vec();
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    sealing
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut buf)
        .map_err(|e| CryptoError::Encryption(format!("{e:?}")))?;

    // seal appends the 16-byte tag; split it out.
    let tag = buf.split_off(buf.len() - TAG_LEN);

    Ok(EncryptedContent {
        ciphertext: encode_base64(&buf),
        iv: encode_base64(&nonce_bytes),
        tag: encode_base64(&tag),
    })
}

/// Decrypt ciphertext/iv/tag parts. A `None` tag is a hard failure, never a
/// plaintext passthrough.
pub fn decrypt_parts(
    key: &SymmetricKey,
    ciphertext_b64: &str,
    iv_b64: &str,
    tag_b64: Option<&str>,
) -> Result<String, CryptoError> {
    let tag_b64 = tag_b64.ok_or(CryptoError::MissingTag)?;

    let mut buf = decode_base64(ciphertext_b64)?;
    let iv = decode_base64(iv_b64)?;
    let tag = decode_base64(tag_b64)?;

    if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(CryptoError::InvalidEncoding(
            "bad iv or tag length".to_string(),
        ));
    }
    buf.extend_from_slice(&tag);

    let unbound = UnboundKey::new(&AES_256_GCM, &key.0).map_err(|_| CryptoError::Decryption)?;
    let opening = LessSafeKey::new(unbound);

    let nonce =
        Nonce::try_assume_unique_for_key(&iv).map_err(|_| CryptoError::Decryption)?;
    let plaintext = opening
        .open_in_place(nonce, Aad::empty(), &mut buf)
        .map_err(|_| CryptoError::Decryption)?;

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| CryptoError::InvalidEncoding("plaintext is not UTF-8".to_string()))
}

/// Decrypt an [`EncryptedContent`] value.
pub fn decrypt_content(key: &SymmetricKey, content: &EncryptedContent) -> Result<String, CryptoError> {
    decrypt_parts(key, &content.ciphertext, &content.iv, Some(&content.tag))
}

/// Process-wide key lifecycle.
///
/// Injected into the orchestrator and conflict manager; `delete_all_keys`
/// drops both keys at once so no caller can observe a half-deleted state.
pub struct KeyManager {
    symmetric: RwLock<Option<Arc<SymmetricKey>>>,
    metric: RwLock<Option<Arc<MetricCipher>>>,
}

impl KeyManager {
    pub fn new() -> Self {
        Self {
            symmetric: RwLock::new(None),
            metric: RwLock::new(None),
        }
    }

    /// Generate and install a fresh symmetric key, returning its export.
    pub fn generate_symmetric_key(&self) -> Result<String, CryptoError> {
        let key = SymmetricKey::generate()?;
        let exported = key.to_base64();
        *self.symmetric.write().unwrap() = Some(Arc::new(key));
        log::info!("Symmetric content key generated");
        Ok(exported)
    }

    /// Install a previously exported symmetric key (app start).
    pub fn load_symmetric_key(&self, exported: &str) -> Result<(), CryptoError> {
        let key = SymmetricKey::from_base64(exported)?;
        *self.symmetric.write().unwrap() = Some(Arc::new(key));
        Ok(())
    }

    pub fn symmetric_key(&self) -> Option<Arc<SymmetricKey>> {
        self.symmetric.read().unwrap().clone()
    }

    pub fn has_symmetric_key(&self) -> bool {
        self.symmetric.read().unwrap().is_some()
    }

    /// Generate and install a fresh metric cipher keypair.
    pub fn generate_metric_keys(&self) -> Result<(), CryptoError> {
        let cipher = MetricCipher::generate()?;
        *self.metric.write().unwrap() = Some(Arc::new(cipher));
        log::info!("Metric cipher keys generated");
        Ok(())
    }

    pub fn metric_cipher(&self) -> Option<Arc<MetricCipher>> {
        self.metric.read().unwrap().clone()
    }

    /// Public parameters of the metric cipher, pushed with the privacy tier.
    pub fn metric_public_context(&self) -> Option<String> {
        self.metric
            .read()
            .unwrap()
            .as_ref()
            .map(|c| c.public_context())
    }

    /// Drop every key at once. Subsequent key reads see `None`.
    pub fn delete_all_keys(&self) {
        *self.symmetric.write().unwrap() = None;
        *self.metric.write().unwrap() = None;
        log::info!("All encryption keys deleted");
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode bytes to base64 (standard alphabet).
pub fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode base64 to bytes.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, CryptoError> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
