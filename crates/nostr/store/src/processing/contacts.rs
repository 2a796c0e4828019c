//! Kind 3 follow lists.

use super::{Change, ProcessOutcome};
use crate::db::Store;
use crate::error::Result;
use crate::events::StoredEvent;
use nostr::nip02::{Contact, contacts_from_event};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, warn};

pub(super) fn apply(store: &Store, stored: &StoredEvent) -> Result<ProcessOutcome> {
    let event = &stored.event;
    let contacts = match contacts_from_event(event) {
        Ok(contacts) => contacts,
        Err(e) => {
            warn!(id = %event.id, "unreadable contact list: {}", e);
            return Ok(ProcessOutcome::done(Vec::new()));
        }
    };

    let mut conn = store.writer()?;
    let tx = conn.transaction()?;

    let applied_at: Option<i64> = tx
        .query_row(
            "SELECT applied_at FROM follow_lists WHERE owner = ?1",
            [&event.pubkey],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(applied_at) = applied_at
        && applied_at as u64 >= event.created_at
    {
        debug!(owner = %event.pubkey, "ignoring contact list no newer than the applied one");
        return Ok(ProcessOutcome::done(Vec::new()));
    }

    tx.execute("DELETE FROM follows WHERE owner = ?1", [&event.pubkey])?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO follows (owner, pubkey, relay_url, petname) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for contact in &contacts {
            stmt.execute(params![
                event.pubkey,
                contact.pubkey,
                contact.relay_url,
                contact.petname
            ])?;
        }
    }
    tx.execute(
        "INSERT INTO follow_lists (owner, applied_at, event_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(owner) DO UPDATE SET applied_at = excluded.applied_at, event_id = excluded.event_id",
        params![event.pubkey, event.created_at as i64, event.id],
    )?;
    tx.commit()?;

    Ok(ProcessOutcome::done(vec![Change::FollowsChanged {
        owner: event.pubkey.clone(),
    }]))
}

impl Store {
    /// The applied follow list of `owner`.
    pub fn follows(&self, owner: &str) -> Result<Vec<Contact>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT pubkey, relay_url, petname FROM follows WHERE owner = ?1 ORDER BY pubkey",
        )?;
        let contacts = stmt
            .query_map([owner], |row| {
                Ok(Contact {
                    pubkey: row.get(0)?,
                    relay_url: row.get(1)?,
                    petname: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contacts)
    }
}
