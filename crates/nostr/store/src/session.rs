//! The account the engine acts for.

use nostr::Signer;
use std::fmt;
use std::sync::Arc;

/// Account context for processing and publishing.
///
/// Processing only needs the pubkey; publishing also needs a signer. A session
/// without one is read-only.
#[derive(Clone)]
pub struct Session {
    pub pubkey: String,
    pub signer: Option<Arc<dyn Signer>>,
}

impl Session {
    pub fn read_only(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            signer: None,
        }
    }

    pub fn with_signer(signer: Arc<dyn Signer>) -> Self {
        Self {
            pubkey: signer.public_key().to_string(),
            signer: Some(signer),
        }
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pubkey", &self.pubkey)
            .field("can_sign", &self.can_sign())
            .finish()
    }
}
