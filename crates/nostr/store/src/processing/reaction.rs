//! Kind 7 reactions. One reaction counts per (target, author); a newer one
//! replaces the older.

use super::{Change, ProcessOutcome};
use crate::db::Store;
use crate::error::Result;
use crate::events::StoredEvent;
use nostr::nip25::Reaction;
use rusqlite::params;
use std::collections::BTreeMap;

pub(super) fn apply(store: &Store, stored: &StoredEvent) -> Result<ProcessOutcome> {
    let event = &stored.event;
    let Some(target_id) = stored.derived.reply_to_id.as_deref() else {
        return Ok(ProcessOutcome::done(Vec::new()));
    };

    match store.get_event(target_id)? {
        Some(target) if target.processed => {}
        _ => return Ok(ProcessOutcome::pending(target_id, Vec::new())),
    }

    let conn = store.writer()?;
    let changed = conn.execute(
        "INSERT INTO reactions (target_id, pubkey, event_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(target_id, pubkey) DO UPDATE SET
             event_id = excluded.event_id,
             content = excluded.content,
             created_at = excluded.created_at
         WHERE excluded.created_at > reactions.created_at",
        params![
            target_id,
            event.pubkey,
            event.id,
            event.content,
            event.created_at as i64
        ],
    )?;

    let changes = if changed > 0 {
        vec![Change::ReactionRecorded {
            target_id: target_id.to_string(),
        }]
    } else {
        Vec::new()
    };
    Ok(ProcessOutcome::done(changes))
}

impl Store {
    /// Reaction counts for an event, keyed by reaction content.
    pub fn reaction_counts(&self, target_id: &str) -> Result<BTreeMap<String, u64>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT content FROM reactions WHERE target_id = ?1")?;
        let mut counts = BTreeMap::new();
        for content in stmt.query_map([target_id], |row| row.get::<_, String>(0))? {
            let reaction = Reaction::from_content(&content?);
            *counts.entry(reaction.as_content().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
