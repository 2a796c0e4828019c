//! Durable local event store for the relay pool.
//!
//! # Architecture
//!
//! ```text
//! relay frames ──> store_event ──> events (+ tags, hashtags, seen_by_relay)
//!                                     │
//!                                     ▼
//!                               process_event ──> follows, reactions, reposts,
//!                                     │           dm_pairs, mentions, profiles,
//!                                     │           channels, relays
//!                                     ▼
//!                                  Change  ──> pool notifications
//! ```
//!
//! Writes are serialized through a single pooled writer connection; reads use a
//! separate pool against the same WAL-mode SQLite file.

mod db;
mod error;
mod events;
mod processing;
mod query;
mod relays;
mod session;

pub use db::{ConnectionPool, DatabaseConfig, Store};
pub use error::{Result, StoreError};
pub use events::{StoredEvent, WriteOutcome};
pub use processing::{Change, Channel, DmPair, ProcessOutcome, ProcessStatus};
pub use query::DetailKind;
pub use relays::{RelayId, RelayRecord};
pub use session::Session;
