//! Nostr protocol types for the relay pool.
//!
//! This crate provides:
//! - NIP-01: events, canonical hashing, signing and verification, kind classes
//! - Filters (NIP-01 with NIP-50 search) usable on the wire and locally
//! - NIP-02: follow lists
//! - NIP-04: direct message addressing
//! - NIP-09: deletion requests
//! - NIP-10: reply and thread resolution
//! - NIP-13: proof of work
//! - NIP-18: reposts
//! - NIP-25: reactions
//! - NIP-27: content references (mentions, hashtags, relay URLs)
//! - NIP-28: public chat channels
//! - Replaceable and addressable coordinates (formerly NIP-33)
//! - The [`Signer`] capability the engine signs through
//!
//! # Features
//!
//! - `full` (default): key generation, signing and verification

mod derived;
mod filter;
mod metadata;
mod nip01;
pub mod nip02;
pub mod nip04;
pub mod nip09;
pub mod nip10;
pub mod nip13;
pub mod nip18;
pub mod nip25;
pub mod nip27;
pub mod nip28;
pub mod nip33;
mod signer;

pub use derived::Derived;
pub use filter::{Filter, search_matches};
pub use metadata::ProfileMetadata;
pub use nip01::{
    Event, EventTemplate, KIND_CHANNEL_CREATION, KIND_CHANNEL_MESSAGE, KIND_CHANNEL_METADATA,
    KIND_CONTACTS, KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_EVENT_DELETION, KIND_GENERIC_REPOST,
    KIND_METADATA, KIND_REACTION, KIND_RECOMMEND_RELAY, KIND_REPOST, KIND_SHORT_TEXT_NOTE,
    KindClassification, Nip01Error, UnsignedEvent, classify_kind, is_addressable_kind,
    is_ephemeral_kind, is_regular_kind, is_replaceable_kind, serialize_event, sort_events,
    unix_now, validate_event,
};
pub use nip33::{Coordinate, replaceable_id};
pub use signer::{Signer, SignerError};

// Crypto (requires full feature)
#[cfg(feature = "full")]
pub use nip01::{finalize_event, generate_secret_key, get_event_hash, get_public_key_hex};
#[cfg(feature = "full")]
pub use signer::Keys;
