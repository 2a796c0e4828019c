//! Event write path: dedup, echo detection, replaceable supersession and
//! per-relay seen tracking.

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::relays::RelayId;
use nostr::{Derived, Event, is_ephemeral_kind, unix_now, validate_event};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::{debug, trace};

/// What happened to an event handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// First time this id was seen; persisted.
    Stored,
    /// A relay returned an event we published ourselves.
    Echoed,
    /// Already stored.
    Duplicate,
    /// A newer event with the same replaceable id is already stored.
    Superseded,
    /// Ephemeral kinds are delivered but never persisted.
    Ephemeral,
}

impl WriteOutcome {
    /// Whether the event is new to this process and should be surfaced.
    pub fn is_new(self) -> bool {
        matches!(self, WriteOutcome::Stored | WriteOutcome::Ephemeral)
    }
}

/// An event as held in the store, with its bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub event: Event,
    pub derived: Derived,
    /// `min(created_at, time of receipt)`; feeds are ordered by this.
    pub curated_at: u64,
    pub received_at: u64,
    pub processed: bool,
    pub deleted: bool,
    /// Published locally and not yet echoed by any relay.
    pub can_echo: bool,
    /// Published locally.
    pub local: bool,
}

pub(crate) const EVENT_COLUMNS: &str = "id, pubkey, created_at, kind, tags, content, sig, derived, \
     curated_at, received_at, processed, deleted, can_echo, local";

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Map a row selected with [`EVENT_COLUMNS`].
pub(crate) fn map_stored_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        event: Event {
            id: row.get(0)?,
            pubkey: row.get(1)?,
            created_at: row.get::<_, i64>(2)? as u64,
            kind: row.get::<_, i64>(3)? as u16,
            tags: json_column(row, 4)?,
            content: row.get(5)?,
            sig: row.get(6)?,
        },
        derived: json_column(row, 7)?,
        curated_at: row.get::<_, i64>(8)? as u64,
        received_at: row.get::<_, i64>(9)? as u64,
        processed: row.get(10)?,
        deleted: row.get(11)?,
        can_echo: row.get(12)?,
        local: row.get(13)?,
    })
}

impl Store {
    /// Store an event received from a relay (or from nowhere in particular
    /// when `relay_id` is `None`, e.g. an event embedded in a repost).
    ///
    /// The relay is recorded as having seen the event whatever the outcome.
    pub fn store_event(&self, event: &Event, relay_id: Option<RelayId>) -> Result<WriteOutcome> {
        self.write_event(event, relay_id, false)
    }

    /// Store an event authored and signed locally. It is flagged so that the
    /// first relay echo is reported as [`WriteOutcome::Echoed`] and so the
    /// outbound path keeps offering it to relays that haven't seen it.
    pub fn store_local(&self, event: &Event) -> Result<WriteOutcome> {
        self.write_event(event, None, true)
    }

    /// Record that `relay_id` has the event.
    pub fn mark_seen(&self, relay_id: RelayId, event_id: &str) -> Result<()> {
        let conn = self.writer()?;
        mark_seen_with(&conn, relay_id, event_id)
    }

    /// Relays known to hold the event.
    pub fn seen_by(&self, event_id: &str) -> Result<Vec<RelayId>> {
        let conn = self.reader()?;
        let mut stmt =
            conn.prepare("SELECT relay_id FROM seen_by_relay WHERE event_id = ?1 ORDER BY relay_id")?;
        let ids = stmt
            .query_map([event_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<RelayId>>>()?;
        Ok(ids)
    }

    fn write_event(
        &self,
        event: &Event,
        relay_id: Option<RelayId>,
        local: bool,
    ) -> Result<WriteOutcome> {
        if !validate_event(event) {
            return Err(StoreError::InvalidEvent(format!(
                "malformed id, pubkey, sig or created_at on {}",
                event.id
            )));
        }

        let mut conn = self.writer()?;
        let outcome = insert_event(&mut conn, event, local)?;
        if let Some(relay_id) = relay_id
            && outcome != WriteOutcome::Ephemeral
        {
            mark_seen_with(&conn, relay_id, &event.id)?;
        }

        trace!(id = %event.id, kind = event.kind, ?outcome, "event written");
        Ok(outcome)
    }
}

fn mark_seen_with(conn: &Connection, relay_id: RelayId, event_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO seen_by_relay (relay_id, event_id) VALUES (?1, ?2)",
        params![relay_id, event_id],
    )?;
    Ok(())
}

fn insert_event(conn: &mut Connection, event: &Event, local: bool) -> Result<WriteOutcome> {
    let existing: Option<bool> = conn
        .query_row(
            "SELECT can_echo FROM events WHERE id = ?1",
            [&event.id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(true) if !local => {
            conn.execute("UPDATE events SET can_echo = 0 WHERE id = ?1", [&event.id])?;
            return Ok(WriteOutcome::Echoed);
        }
        Some(_) => return Ok(WriteOutcome::Duplicate),
        None => {}
    }

    if is_ephemeral_kind(event.kind) {
        return Ok(WriteOutcome::Ephemeral);
    }

    let derived = Derived::from_event(event);
    let now = unix_now();
    let tx = conn.transaction()?;

    if let Some(ref replaceable_id) = derived.replaceable_id {
        // Ties go to the newcomer: the older-or-equal row is removed first.
        let stale: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM events WHERE replaceable_id = ?1 AND created_at <= ?2",
            )?;
            let ids = stmt
                .query_map(params![replaceable_id, event.created_at as i64], |row| {
                    row.get(0)
                })?
                .collect::<rusqlite::Result<_>>()?;
            ids
        };
        for id in &stale {
            tx.execute("DELETE FROM event_tags WHERE event_id = ?1", [id])?;
            tx.execute("DELETE FROM hashtags WHERE event_id = ?1", [id])?;
            tx.execute("DELETE FROM events WHERE id = ?1", [id])?;
            debug!(old = %id, new = %event.id, %replaceable_id, "superseded replaceable event");
        }
    }

    let inserted = tx.execute(
        "INSERT INTO events (id, pubkey, created_at, kind, tags, content, sig, derived,
                             reply_to_id, root_id, channel_id, repost_of, dm_peer,
                             replaceable_id, pow_difficulty, curated_at, received_at,
                             can_echo, local)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            event.id,
            event.pubkey,
            event.created_at as i64,
            event.kind as i64,
            serde_json::to_string(&event.tags)?,
            event.content,
            event.sig,
            serde_json::to_string(&derived)?,
            derived.reply_to_id,
            derived.root_id,
            derived.channel_id,
            derived.repost_of,
            derived.dm_peer,
            derived.replaceable_id,
            derived.pow_difficulty as i64,
            event.created_at.min(now) as i64,
            now as i64,
            local,
            local,
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            // A strictly newer row holds the replaceable id; dropping `tx`
            // rolls back.
            return Ok(if derived.replaceable_id.is_some() {
                WriteOutcome::Superseded
            } else {
                WriteOutcome::Duplicate
            });
        }
        Err(e) => return Err(e.into()),
    }

    {
        let mut tag_stmt =
            tx.prepare("INSERT INTO event_tags (event_id, tag_name, tag_value) VALUES (?1, ?2, ?3)")?;
        for tag in &event.tags {
            if let Some(name) = tag.first() {
                tag_stmt.execute(params![event.id, name, tag.get(1)])?;
            }
        }

        let mut hashtag_stmt =
            tx.prepare("INSERT OR IGNORE INTO hashtags (event_id, tag) VALUES (?1, ?2)")?;
        for hashtag in &derived.hashtags {
            hashtag_stmt.execute(params![event.id, hashtag])?;
        }
    }

    tx.commit()?;
    Ok(WriteOutcome::Stored)
}
