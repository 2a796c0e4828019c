//! Kind 4 direct messages, grouped into conversations keyed by the ordered
//! pair of participants, with a read watermark per side.

use super::{Change, ProcessOutcome};
use crate::db::Store;
use crate::error::Result;
use crate::events::StoredEvent;
use crate::session::Session;
use nostr::nip04::pair_key;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// A conversation between two pubkeys, `low < high`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmPair {
    pub low: String,
    pub high: String,
    pub last_message_at: u64,
    pub low_read_at: u64,
    pub high_read_at: u64,
}

impl DmPair {
    /// Whether `pubkey` has messages newer than its read watermark.
    pub fn has_unread(&self, pubkey: &str) -> bool {
        let read_at = if pubkey == self.low {
            self.low_read_at
        } else if pubkey == self.high {
            self.high_read_at
        } else {
            return false;
        };
        self.last_message_at > read_at
    }
}

pub(super) fn apply(store: &Store, stored: &StoredEvent) -> Result<ProcessOutcome> {
    let event = &stored.event;
    let Some(peer) = stored.derived.dm_peer.as_deref() else {
        return Ok(ProcessOutcome::done(Vec::new()));
    };

    let (low, high) = pair_key(&event.pubkey, peer);
    // Sending a message implies having read the conversation up to it.
    let (low_read, high_read) = if event.pubkey == low {
        (event.created_at, 0)
    } else {
        (0, event.created_at)
    };

    let conn = store.writer()?;
    conn.execute(
        "INSERT INTO dm_pairs (low, high, last_message_at, low_read_at, high_read_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(low, high) DO UPDATE SET
             last_message_at = MAX(last_message_at, excluded.last_message_at),
             low_read_at = MAX(low_read_at, excluded.low_read_at),
             high_read_at = MAX(high_read_at, excluded.high_read_at)",
        params![
            low,
            high,
            event.created_at as i64,
            low_read as i64,
            high_read as i64
        ],
    )?;

    Ok(ProcessOutcome::done(vec![Change::DmPairChanged {
        low: low.to_string(),
        high: high.to_string(),
    }]))
}

impl Store {
    pub fn dm_pair(&self, a: &str, b: &str) -> Result<Option<DmPair>> {
        let (low, high) = pair_key(a, b);
        let conn = self.reader()?;
        Ok(conn
            .query_row(
                "SELECT low, high, last_message_at, low_read_at, high_read_at
                 FROM dm_pairs WHERE low = ?1 AND high = ?2",
                params![low, high],
                |row| {
                    Ok(DmPair {
                        low: row.get(0)?,
                        high: row.get(1)?,
                        last_message_at: row.get::<_, i64>(2)? as u64,
                        low_read_at: row.get::<_, i64>(3)? as u64,
                        high_read_at: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?)
    }

    /// Conversations the account takes part in, most recent first.
    pub fn dm_pairs_for(&self, pubkey: &str) -> Result<Vec<DmPair>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT low, high, last_message_at, low_read_at, high_read_at
             FROM dm_pairs WHERE low = ?1 OR high = ?1 ORDER BY last_message_at DESC",
        )?;
        let pairs = stmt
            .query_map([pubkey], |row| {
                Ok(DmPair {
                    low: row.get(0)?,
                    high: row.get(1)?,
                    last_message_at: row.get::<_, i64>(2)? as u64,
                    low_read_at: row.get::<_, i64>(3)? as u64,
                    high_read_at: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    /// Advance the session account's read watermark in its conversation with
    /// `peer`. Watermarks never move backwards; returns whether it moved.
    pub fn mark_dm_read(&self, session: &Session, peer: &str, read_at: u64) -> Result<bool> {
        let (low, high) = pair_key(&session.pubkey, peer);
        let column = if session.pubkey == low {
            "low_read_at"
        } else {
            "high_read_at"
        };
        let conn = self.writer()?;
        let changed = conn.execute(
            &format!(
                "UPDATE dm_pairs SET {column} = ?3 WHERE low = ?1 AND high = ?2 AND {column} < ?3"
            ),
            params![low, high, read_at as i64],
        )?;
        Ok(changed > 0)
    }
}
