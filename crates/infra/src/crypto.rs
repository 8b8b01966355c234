//! Secret encryption for values that end up in event payloads.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

use keystone_core::{CryptoType, CryptoValue};

/// Nonce size for AES-GCM (12 bytes)
const NONCE_SIZE: usize = 12;
/// Authentication tag size for AES-GCM (16 bytes)
const TAG_SIZE: usize = 16;

pub const AES_256_GCM: &str = "aes-256-gcm";

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("value was produced by algorithm '{found}', expected '{expected}'")]
    AlgorithmMismatch { expected: String, found: String },

    #[error("invalid ciphertext")]
    InvalidCiphertext,
}

/// Turns a plaintext secret into an opaque [`CryptoValue`].
///
/// Implementations must never log or retain the plaintext.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<CryptoValue, EncryptionError>;
}

/// AES-256-GCM with a random nonce per value. `crypted` is
/// `nonce(12) || ciphertext || tag(16)`.
#[derive(Clone)]
pub struct AesGcmEncryptor {
    key_id: String,
    key: [u8; 32],
}

impl AesGcmEncryptor {
    pub fn new(key_id: impl Into<String>, key: [u8; 32]) -> Self {
        Self {
            key_id: key_id.into(),
            key,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Recover the plaintext of a value produced by this key.
    pub fn decrypt(&self, value: &CryptoValue) -> Result<String, EncryptionError> {
        if value.algorithm != AES_256_GCM {
            return Err(EncryptionError::AlgorithmMismatch {
                expected: AES_256_GCM.to_string(),
                found: value.algorithm.clone(),
            });
        }
        if value.key_id != self.key_id {
            return Err(EncryptionError::InvalidKey(format!(
                "value was encrypted with key '{}'",
                value.key_id
            )));
        }
        if value.crypted.len() < NONCE_SIZE + TAG_SIZE {
            return Err(EncryptionError::InvalidCiphertext);
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;
        let nonce = Nonce::from_slice(&value.crypted[..NONCE_SIZE]);
        let plaintext = cipher
            .decrypt(nonce, &value.crypted[NONCE_SIZE..])
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|_| EncryptionError::InvalidCiphertext)
    }
}

impl Encryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<CryptoValue, EncryptionError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut crypted = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        crypted.extend_from_slice(&nonce_bytes);
        crypted.extend_from_slice(&ciphertext);

        Ok(CryptoValue {
            crypto_type: CryptoType::Encryption,
            algorithm: AES_256_GCM.to_string(),
            key_id: self.key_id.clone(),
            crypted,
        })
    }
}

// The key never shows up in debug output.
impl core::fmt::Debug for AesGcmEncryptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AesGcmEncryptor")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Parse a 32-byte key given as hex (optionally `0x`-prefixed) or base64.
pub fn parse_32_byte_key(s: &str) -> Result<[u8; 32], EncryptionError> {
    let trimmed = s.trim();
    let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);

    if hex_str.len() == 64 && hex_str.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(hex_str)
            .map_err(|e| EncryptionError::InvalidKey(format!("invalid hex: {e}")))?;
        return bytes
            .try_into()
            .map_err(|_| EncryptionError::InvalidKey("key must be 32 bytes".to_string()));
    }

    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, trimmed)
        .or_else(|_| {
            base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, trimmed)
        })
        .map_err(|e| EncryptionError::InvalidKey(format!("invalid base64: {e}")))?;

    bytes
        .try_into()
        .map_err(|_| EncryptionError::InvalidKey("key must be 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor() -> AesGcmEncryptor {
        AesGcmEncryptor::new("smtp", [7u8; 32])
    }

    #[test]
    fn encrypt_then_decrypt_recovers_the_secret() {
        let value = encryptor().encrypt("password").unwrap();
        assert_eq!(value.crypto_type, CryptoType::Encryption);
        assert_eq!(value.algorithm, AES_256_GCM);
        assert_eq!(value.key_id, "smtp");
        assert_eq!(value.crypted.len(), NONCE_SIZE + "password".len() + TAG_SIZE);
        assert_eq!(encryptor().decrypt(&value).unwrap(), "password");
    }

    #[test]
    fn ciphertext_never_contains_the_plaintext() {
        let value = encryptor().encrypt("password").unwrap();
        assert!(!value.crypted.windows(8).any(|w| w == b"password"));
    }

    #[test]
    fn nonces_differ_between_calls() {
        let a = encryptor().encrypt("same").unwrap();
        let b = encryptor().encrypt("same").unwrap();
        assert_ne!(a.crypted, b.crypted);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let value = encryptor().encrypt("password").unwrap();
        let other = AesGcmEncryptor::new("smtp", [8u8; 32]);
        assert!(matches!(
            other.decrypt(&value),
            Err(EncryptionError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let rendered = format!("{:?}", encryptor());
        assert!(rendered.contains("smtp"));
        assert!(!rendered.contains("7, 7"));
    }

    #[test]
    fn keys_parse_from_hex_and_base64() {
        let hex_key = "0x".to_string() + &"ab".repeat(32);
        assert_eq!(parse_32_byte_key(&hex_key).unwrap(), [0xab; 32]);

        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [1u8; 32]);
        assert_eq!(parse_32_byte_key(&b64).unwrap(), [1u8; 32]);

        let b64url =
            base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, [0xfb; 32]);
        assert_eq!(parse_32_byte_key(&b64url).unwrap(), [0xfb; 32]);

        assert!(parse_32_byte_key("short").is_err());
        assert!(parse_32_byte_key(&"ab".repeat(16)).is_err());
    }
}
