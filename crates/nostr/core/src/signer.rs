//! Signing capability.
//!
//! The engine never holds keys itself. Callers hand it something that implements
//! [`Signer`]; [`Keys`] is the in-process secp256k1 implementation used by tools
//! and tests.

use crate::nip01::{Event, EventTemplate};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid secret key: {0}")]
    InvalidKey(String),

    #[error("{0} is not supported by this signer")]
    Unsupported(&'static str),

    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Something that can turn templates into signed events on behalf of one pubkey.
pub trait Signer: Send + Sync {
    /// Hex x-only public key of the account this signer acts for.
    fn public_key(&self) -> &str;

    /// Compute id and signature for the template.
    fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError>;

    /// NIP-04 encrypt `plaintext` for `peer`.
    fn nip04_encrypt(&self, _peer: &str, _plaintext: &str) -> Result<String, SignerError> {
        Err(SignerError::Unsupported("nip04 encryption"))
    }

    /// NIP-04 decrypt a payload received from `peer`.
    fn nip04_decrypt(&self, _peer: &str, _payload: &str) -> Result<String, SignerError> {
        Err(SignerError::Unsupported("nip04 decryption"))
    }
}

/// A secret key held in memory.
#[cfg(feature = "full")]
#[derive(Clone)]
pub struct Keys {
    secret: [u8; 32],
    public: String,
}

#[cfg(feature = "full")]
impl Keys {
    /// Fresh random keys.
    pub fn generate() -> Self {
        // A random 32-byte scalar is valid except with negligible probability;
        // retry instead of surfacing that case.
        loop {
            let secret = crate::nip01::generate_secret_key();
            if let Ok(keys) = Self::from_secret(secret) {
                return keys;
            }
        }
    }

    pub fn from_secret(secret: [u8; 32]) -> Result<Self, SignerError> {
        let public = crate::nip01::get_public_key_hex(&secret)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self { secret, public })
    }

    /// Parse a 64 character hex secret key.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignerError::InvalidKey("expected 32 bytes".to_string()))?;
        Self::from_secret(secret)
    }
}

#[cfg(feature = "full")]
impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys").field("public", &self.public).finish()
    }
}

#[cfg(feature = "full")]
impl Signer for Keys {
    fn public_key(&self) -> &str {
        &self.public
    }

    fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError> {
        crate::nip01::finalize_event(template, &self.secret)
            .map_err(|e| SignerError::Signing(e.to_string()))
    }
}

#[cfg(all(test, feature = "full"))]
mod tests {
    use super::*;

    #[test]
    fn test_keys_sign_verifies() {
        let keys = Keys::generate();
        let event = keys.sign(&EventTemplate::new(1, "hello")).unwrap();
        assert_eq!(event.pubkey, keys.public_key());
        assert!(event.verify().is_ok());
    }

    #[test]
    fn test_from_secret_hex_roundtrip_pubkey() {
        let keys = Keys::generate();
        let again = Keys::from_secret_hex(&hex::encode(keys.secret)).unwrap();
        assert_eq!(keys.public_key(), again.public_key());
    }

    #[test]
    fn test_from_secret_hex_rejects_short_input() {
        assert!(matches!(
            Keys::from_secret_hex("abcd"),
            Err(SignerError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_nip04_unsupported_by_default() {
        let keys = Keys::generate();
        assert!(matches!(
            keys.nip04_encrypt("peer", "hi"),
            Err(SignerError::Unsupported(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let keys = Keys::generate();
        let printed = format!("{:?}", keys);
        assert!(!printed.contains(&hex::encode(keys.secret)));
    }
}
