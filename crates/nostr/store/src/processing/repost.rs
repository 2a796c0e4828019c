//! Kinds 6 and 16 reposts. An embedded copy of the reposted event is verified
//! and ingested so the repost can be shown without another round trip.

use super::{Change, ProcessOutcome};
use crate::db::Store;
use crate::error::Result;
use crate::events::StoredEvent;
use crate::session::Session;
use nostr::nip18::embedded_event;
use rusqlite::params;
use tracing::{debug, warn};

pub(super) fn apply(store: &Store, session: &Session, stored: &StoredEvent) -> Result<ProcessOutcome> {
    let event = &stored.event;
    let Some(target_id) = stored.derived.repost_of.as_deref() else {
        return Ok(ProcessOutcome::done(Vec::new()));
    };

    let mut changes = Vec::new();

    if !store.contains(target_id)?
        && let Some(inner) = embedded_event(event)
    {
        match inner.verify() {
            Ok(()) => {
                if store.store_event(&inner, None)?.is_new() {
                    debug!(repost = %event.id, inner = %inner.id, "ingested reposted event");
                    changes.extend(store.process_event(session, &inner.id)?.changes);
                }
            }
            Err(e) => warn!(repost = %event.id, "embedded event rejected: {}", e),
        }
    }

    let conn = store.writer()?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO reposts (event_id, target_id, pubkey, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![event.id, target_id, event.pubkey, event.created_at as i64],
    )?;
    if inserted > 0 {
        changes.push(Change::RepostRecorded {
            target_id: target_id.to_string(),
        });
    }

    Ok(ProcessOutcome::done(changes))
}

impl Store {
    pub fn repost_count(&self, target_id: &str) -> Result<u64> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reposts WHERE target_id = ?1",
            [target_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
