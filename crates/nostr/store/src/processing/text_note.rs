//! Text notes and channel messages: account mentions and relay discovery.

use super::{Change, ProcessOutcome};
use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::events::StoredEvent;
use crate::session::Session;
use nostr::nip10::mentioned_pubkeys;
use rusqlite::params;
use tracing::{debug, info};

pub(super) fn apply(store: &Store, session: &Session, stored: &StoredEvent) -> Result<ProcessOutcome> {
    let event = &stored.event;
    let mut changes = Vec::new();

    if event.pubkey != session.pubkey
        && mentioned_pubkeys(&event.tags).contains(&session.pubkey)
        && store.record_mention(&session.pubkey, &event.id, event.created_at)?
    {
        changes.push(Change::MentionsChanged {
            account: session.pubkey.clone(),
            count: store.mention_count(&session.pubkey)?,
        });
    }

    for uri in &stored.derived.relay_urls {
        match store.ensure_relay(uri) {
            Ok((record, true)) => {
                info!("Discovered relay {}", record.uri);
                changes.push(Change::RelayDiscovered { uri: record.uri });
            }
            Ok((_, false)) => {}
            Err(StoreError::InvalidRelayUrl(_)) => debug!(%uri, "ignoring unusable relay url"),
            Err(e) => return Err(e),
        }
    }

    Ok(ProcessOutcome::done(changes))
}

impl Store {
    /// Returns true if the mention was new.
    fn record_mention(&self, account: &str, event_id: &str, created_at: u64) -> Result<bool> {
        let conn = self.writer()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO mentions (account, event_id, created_at) VALUES (?1, ?2, ?3)",
            params![account, event_id, created_at as i64],
        )?;
        Ok(inserted > 0)
    }

    /// Number of events mentioning the account.
    pub fn mention_count(&self, account: &str) -> Result<u64> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM mentions m JOIN events e ON e.id = m.event_id
             WHERE m.account = ?1 AND e.deleted = 0",
            [account],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
