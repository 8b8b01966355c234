//! Encrypted secret value as it is persisted inside event payloads.

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// How a [`CryptoValue`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoType {
    /// Reversible encryption (the delivery side can decrypt with the key).
    Encryption,
    /// One-way hash.
    Hash,
}

/// Opaque secret tagged with the algorithm and key that produced it.
///
/// The command engine only ever creates these through an encryptor; it never
/// inspects or compares `crypted`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoValue {
    pub crypto_type: CryptoType,
    pub algorithm: String,
    pub key_id: String,
    pub crypted: Vec<u8>,
}

impl ValueObject for CryptoValue {}

// Ciphertext is not interesting in logs and may be large.
impl core::fmt::Debug for CryptoValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CryptoValue")
            .field("crypto_type", &self.crypto_type)
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .field("crypted", &format_args!("<{} bytes>", self.crypted.len()))
            .finish()
    }
}
