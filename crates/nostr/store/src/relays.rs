//! Relay records and per-relay pagination bookkeeping.

use crate::db::Store;
use crate::error::{Result, StoreError};
use nostr::nip27::normalize_relay_url;
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Row id of a relay.
pub type RelayId = i64;

/// A relay the pool may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub id: RelayId,
    pub uri: String,
    /// Higher connects first.
    pub priority: i64,
    pub read: bool,
    pub write: bool,
    pub is_paid: bool,
}

const RELAY_COLUMNS: &str = "id, uri, priority, read, write, is_paid";

fn map_relay(row: &Row<'_>) -> rusqlite::Result<RelayRecord> {
    Ok(RelayRecord {
        id: row.get(0)?,
        uri: row.get(1)?,
        priority: row.get(2)?,
        read: row.get(3)?,
        write: row.get(4)?,
        is_paid: row.get(5)?,
    })
}

impl Store {
    /// Look up a relay by URI, creating it on first mention. The boolean is
    /// true when the record was created by this call.
    pub fn ensure_relay(&self, uri: &str) -> Result<(RelayRecord, bool)> {
        let uri = normalize_relay_url(uri).ok_or_else(|| StoreError::InvalidRelayUrl(uri.into()))?;
        let conn = self.writer()?;
        let created = conn.execute("INSERT OR IGNORE INTO relays (uri) VALUES (?1)", [&uri])? > 0;
        let sql = format!("SELECT {RELAY_COLUMNS} FROM relays WHERE uri = ?1");
        let record = conn.query_row(&sql, [&uri], map_relay)?;
        Ok((record, created))
    }

    /// Add a relay with a priority, or update the priority of a known one.
    pub fn upsert_relay(&self, uri: &str, priority: i64) -> Result<RelayRecord> {
        let (record, _) = self.ensure_relay(uri)?;
        self.set_priority(record.id, priority)?;
        Ok(RelayRecord { priority, ..record })
    }

    /// Insert the given relays only if no relay is known yet. Returns how many
    /// were added.
    pub fn seed_default_relays(&self, defaults: &[(String, i64)]) -> Result<usize> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM relays", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(0);
        }

        let mut added = 0;
        for (uri, priority) in defaults {
            let Some(uri) = normalize_relay_url(uri) else {
                return Err(StoreError::InvalidRelayUrl(uri.clone()));
            };
            added += tx.execute(
                "INSERT OR IGNORE INTO relays (uri, priority) VALUES (?1, ?2)",
                params![uri, priority],
            )?;
        }
        tx.commit()?;

        info!("Seeded {} default relays", added);
        Ok(added)
    }

    pub fn get_relay(&self, id: RelayId) -> Result<Option<RelayRecord>> {
        let conn = self.reader()?;
        let sql = format!("SELECT {RELAY_COLUMNS} FROM relays WHERE id = ?1");
        Ok(conn.query_row(&sql, [id], map_relay).optional()?)
    }

    pub fn relay_by_uri(&self, uri: &str) -> Result<Option<RelayRecord>> {
        let Some(uri) = normalize_relay_url(uri) else {
            return Ok(None);
        };
        let conn = self.reader()?;
        let sql = format!("SELECT {RELAY_COLUMNS} FROM relays WHERE uri = ?1");
        Ok(conn.query_row(&sql, [uri], map_relay).optional()?)
    }

    /// All relays, highest priority first.
    pub fn list_relays(&self) -> Result<Vec<RelayRecord>> {
        let conn = self.reader()?;
        let sql = format!("SELECT {RELAY_COLUMNS} FROM relays ORDER BY priority DESC, id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let relays = stmt
            .query_map([], map_relay)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(relays)
    }

    pub fn set_priority(&self, id: RelayId, priority: i64) -> Result<()> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE relays SET priority = ?2 WHERE id = ?1",
            params![id, priority],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownRelay(id));
        }
        Ok(())
    }

    pub fn set_relay_flags(&self, id: RelayId, read: bool, write: bool, is_paid: bool) -> Result<()> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE relays SET read = ?2, write = ?3, is_paid = ?4 WHERE id = ?1",
            params![id, read, write, is_paid],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownRelay(id));
        }
        Ok(())
    }

    /// Forget a relay along with its seen and pagination rows. Returns false
    /// if it wasn't known.
    pub fn delete_relay(&self, id: RelayId) -> Result<bool> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM seen_by_relay WHERE relay_id = ?1", [id])?;
        tx.execute("DELETE FROM pagination WHERE relay_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM relays WHERE id = ?1", [id])? > 0;
        tx.commit()?;
        Ok(removed)
    }

    /// Record the oldest `created_at` a relay returned for a subscription
    /// shape. Only ever moves backwards.
    pub fn record_oldest(&self, params_id: &str, relay_id: RelayId, created_at: u64) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO pagination (params_id, relay_id, oldest_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(params_id, relay_id)
             DO UPDATE SET oldest_seen = MIN(oldest_seen, excluded.oldest_seen)",
            params![params_id, relay_id, created_at as i64],
        )?;
        Ok(())
    }

    /// Oldest `created_at` seen from a relay for a subscription shape.
    pub fn oldest_seen(&self, params_id: &str, relay_id: RelayId) -> Result<Option<u64>> {
        let conn = self.reader()?;
        let oldest: Option<i64> = conn
            .query_row(
                "SELECT oldest_seen FROM pagination WHERE params_id = ?1 AND relay_id = ?2",
                params![params_id, relay_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(oldest.map(|t| t as u64))
    }
}
