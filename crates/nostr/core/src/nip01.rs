//! NIP-01: Basic protocol flow description.
//!
//! This module implements the core Nostr event structure and operations:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Canonical serialization for hashing
//! - Event signing with Schnorr signatures (requires `full` feature)
//! - Id and signature verification (requires `full` feature)
//! - Kind classification (regular, replaceable, ephemeral, addressable)

#[cfg(feature = "full")]
use bitcoin::hashes::{Hash, sha256};
#[cfg(feature = "full")]
use bitcoin::key::Secp256k1;
#[cfg(feature = "full")]
use bitcoin::secp256k1::{Keypair, Message, SecretKey, XOnlyPublicKey, schnorr};
#[cfg(feature = "full")]
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("event id does not match its content (claimed {claimed}, computed {computed})")]
    IdMismatch { claimed: String, computed: String },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

/// An unsigned event (before signing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// A template for creating events. The pubkey comes from whoever signs it.
///
/// ```
/// use nostr::EventTemplate;
///
/// let template = EventTemplate::new(1, "gm")
///     .tag(["t", "nostr"])
///     .created_at(1_700_000_000);
/// assert_eq!(template.tags, vec![vec!["t".to_string(), "nostr".to_string()]]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current time and no tags.
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Append a tag.
    pub fn tag<I, S>(mut self, tag: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
        self
    }

    /// Override the timestamp.
    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Attach a pubkey, producing the hashable form.
    pub fn into_unsigned(self, pubkey: impl Into<String>) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only latest event per pubkey+kind is stored
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is stored
    Addressable,
    /// Unknown classification
    Unknown,
}

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_RECOMMEND_RELAY: u16 = 2;
pub const KIND_CONTACTS: u16 = 3;
pub const KIND_ENCRYPTED_DIRECT_MESSAGE: u16 = 4;
pub const KIND_EVENT_DELETION: u16 = 5;
pub const KIND_REPOST: u16 = 6;
pub const KIND_REACTION: u16 = 7;
pub const KIND_GENERIC_REPOST: u16 = 16;
pub const KIND_CHANNEL_CREATION: u16 = 40;
pub const KIND_CHANNEL_METADATA: u16 = 41;
pub const KIND_CHANNEL_MESSAGE: u16 = 42;

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl Event {
    /// The fields covered by the id hash.
    pub fn to_unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// Classification of this event's kind.
    pub fn classification(&self) -> KindClassification {
        classify_kind(self.kind)
    }

    /// Iterate over tags with the given name.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Vec<String>> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
    }

    /// Second element of every tag with the given name.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags_named(name)
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// Second element of the first tag with the given name.
    pub fn first_tag_value<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.tag_values(name).next()
    }

    /// Check id and signature. Rejections carry the reason.
    #[cfg(feature = "full")]
    pub fn verify(&self) -> Result<(), Nip01Error> {
        if !validate_event(self) {
            return Err(Nip01Error::InvalidEvent(
                "malformed id, pubkey, signature or timestamp".to_string(),
            ));
        }

        let computed = get_event_hash(&self.to_unsigned())?;
        if computed != self.id {
            return Err(Nip01Error::IdMismatch {
                claimed: self.id.clone(),
                computed,
            });
        }

        let secp = Secp256k1::verification_only();
        let id_bytes = hex::decode(&self.id)
            .map_err(|e| Nip01Error::InvalidEvent(format!("invalid id hex: {}", e)))?;
        let message = Message::from_digest_slice(&id_bytes)
            .map_err(|e| Nip01Error::InvalidEvent(format!("invalid message: {}", e)))?;
        let sig_bytes = hex::decode(&self.sig)
            .map_err(|e| Nip01Error::InvalidSignature(format!("invalid sig hex: {}", e)))?;
        let sig = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| Nip01Error::InvalidSignature(e.to_string()))?;
        let pubkey_bytes = hex::decode(&self.pubkey)
            .map_err(|e| Nip01Error::InvalidPublicKey(e.to_string()))?;
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
            .map_err(|e| Nip01Error::InvalidPublicKey(e.to_string()))?;

        secp.verify_schnorr(&sig, &message, &pubkey)
            .map_err(|e| Nip01Error::InvalidSignature(e.to_string()))
    }
}

/// Generate a random 32-byte secret key.
#[cfg(feature = "full")]
pub fn generate_secret_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Hex x-only public key for a secret key.
#[cfg(feature = "full")]
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip01Error::InvalidPublicKey(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(hex::encode(xonly.serialize()))
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Get the event hash (id) from an unsigned event.
#[cfg(feature = "full")]
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Structural check of a signed event (not including signature verification).
/// Timestamps must fit a signed 64-bit integer so they sort correctly in
/// storage.
pub fn validate_event(event: &Event) -> bool {
    is_lower_hex(&event.id, 64)
        && is_lower_hex(&event.pubkey, 64)
        && is_lower_hex(&event.sig, 128)
        && i64::try_from(event.created_at).is_ok()
}

/// Sign an event template with a secret key, producing a complete signed event.
#[cfg(feature = "full")]
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();

    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let (xonly_pk, _parity) = keypair.x_only_public_key();

    let unsigned = template.clone().into_unsigned(hex::encode(xonly_pk.serialize()));
    let id = get_event_hash(&unsigned)?;

    let id_bytes =
        hex::decode(&id).map_err(|e| Nip01Error::Signing(format!("invalid id hex: {}", e)))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|e| Nip01Error::Signing(format!("invalid message: {}", e)))?;
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    Ok(Event {
        id,
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig.serialize()),
    })
}

/// Classify an event kind according to NIP-01 rules.
pub fn classify_kind(kind: u16) -> KindClassification {
    let k = kind as u32;

    if (1000..10000).contains(&k) || (4..45).contains(&k) || k == 1 || k == 2 {
        return KindClassification::Regular;
    }
    if (10000..20000).contains(&k) || k == 0 || k == 3 {
        return KindClassification::Replaceable;
    }
    if (20000..30000).contains(&k) {
        return KindClassification::Ephemeral;
    }
    if (30000..40000).contains(&k) {
        return KindClassification::Addressable;
    }

    KindClassification::Unknown
}

pub fn is_regular_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Regular)
}

pub fn is_replaceable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Replaceable)
}

pub fn is_ephemeral_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Ephemeral)
}

pub fn is_addressable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Addressable)
}

/// Sort events newest first, ties by id.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}
