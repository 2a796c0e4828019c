//! Bounded Nostr relay pool with subscription reconciliation.
//!
//! This crate provides:
//! - A fixed number of relay connections, chosen by priority and rotated
//!   fairly within a priority
//! - Subscription intents that expand to NIP-01 filters, reconciled onto every
//!   live relay and torn down by lifecycle rules
//! - Rate-limit cooldowns driven by relay NOTICEs
//! - Ingestion into the local [`nostr_store::Store`] and reconciliation of
//!   what arrives, reported as [`Notification`]s
//! - Publishing through the session's signer, with resend to relays that
//!   haven't acknowledged an event
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_client::{Intent, Notification, PoolConfig, RelayPool};
//! use nostr_store::Session;
//!
//! #[tokio::main]
//! async fn main() -> nostr_client::Result<()> {
//!     let pool = RelayPool::open(PoolConfig::load()?, Session::read_only("<hex pubkey>"))?;
//!     let mut notifications = pool.notifications();
//!     pool.start()?;
//!
//!     pool.subscribe(Intent::Mentions {
//!         pubkey: "<hex pubkey>".to_string(),
//!     })
//!     .await;
//!
//!     while let Ok(notification) = notifications.recv().await {
//!         if let Notification::NewEvent { event, .. } = notification {
//!             println!("{}: {}", event.pubkey, event.content);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod catalog;
mod config;
mod connection;
mod error;
mod message;
mod notify;
mod pool;
mod rate_limit;
mod reconciler;
mod scheduler;

pub use catalog::{Intent, Lifecycle, SubscriptionFilter, Window};
pub use config::{DefaultRelay, PoolConfig};
pub use connection::{Connection, ConnectionConfig, ConnectionState, Inbound};
pub use error::{ClientError, Result};
pub use message::{ClientMessage, MessageError, RelayMessage};
pub use notify::{Notification, Notifier};
pub use pool::RelayPool;
pub use rate_limit::{RateLimiter, is_rate_limit_notice};
pub use reconciler::{EoseOutcome, EventRouting, Plan, Reconciler, Removed, Subscribe};
pub use scheduler::RelayQueue;
