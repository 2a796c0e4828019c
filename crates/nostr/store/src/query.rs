//! Read path: lookups, filter queries, thread ancestry and the bookkeeping
//! queries the pool's maintenance loop runs.

use crate::db::Store;
use crate::error::Result;
use crate::events::{EVENT_COLUMNS, StoredEvent, map_stored_event};
use crate::relays::RelayId;
use nostr::{Filter, unix_now};
use rusqlite::{OptionalExtension, ToSql, params};
use std::collections::HashSet;
use std::time::Duration;

/// Cap applied when a filter carries no limit.
const DEFAULT_QUERY_LIMIT: u64 = 500;

/// Kind of cached detail tracked for periodic refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailKind {
    Profile,
    Channel,
}

impl DetailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailKind::Profile => "profile",
            DetailKind::Channel => "channel",
        }
    }
}

impl Store {
    /// Fetch an event by id, tombstoned or not.
    pub fn get_event(&self, id: &str) -> Result<Option<StoredEvent>> {
        let conn = self.reader()?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
        Ok(conn.query_row(&sql, [id], map_stored_event).optional()?)
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        let conn = self.reader()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM events WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// The current event for a replaceable or addressable identity.
    pub fn get_by_replaceable_id(&self, replaceable_id: &str) -> Result<Option<StoredEvent>> {
        let conn = self.reader()?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE replaceable_id = ?1");
        Ok(conn
            .query_row(&sql, [replaceable_id], map_stored_event)
            .optional()?)
    }

    /// Latest events of one kind, newest curated first.
    pub fn newest_by_kind(&self, kind: u16, limit: usize) -> Result<Vec<StoredEvent>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE kind = ?1 AND deleted = 0
             ORDER BY curated_at DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![kind as i64, limit as i64], map_stored_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Run a filter against the local store, newest first. Tombstoned events
    /// are excluded.
    ///
    /// SQL narrows the candidates; every row is then re-checked with
    /// [`Filter::matches`] so prefix and search semantics agree exactly with
    /// what relays are asked for.
    pub fn query(&self, filter: &Filter) -> Result<Vec<StoredEvent>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE deleted = 0");
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref ids) = filter.ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let clauses: Vec<&str> = ids.iter().map(|_| "id LIKE ?").collect();
            sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
            for id in ids {
                params.push(Box::new(format!("{}%", escape_like(id))));
            }
        }

        if let Some(ref authors) = filter.authors {
            if authors.is_empty() {
                return Ok(Vec::new());
            }
            let clauses: Vec<&str> = authors.iter().map(|_| "pubkey LIKE ?").collect();
            sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
            for author in authors {
                params.push(Box::new(format!("{}%", escape_like(author))));
            }
        }

        if let Some(ref kinds) = filter.kinds {
            if kinds.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; kinds.len()].join(",");
            sql.push_str(&format!(" AND kind IN ({placeholders})"));
            for kind in kinds {
                params.push(Box::new(*kind as i64));
            }
        }

        if let Some(since) = filter.since {
            sql.push_str(" AND created_at >= ?");
            params.push(Box::new(since as i64));
        }

        if let Some(until) = filter.until {
            sql.push_str(" AND created_at <= ?");
            params.push(Box::new(until as i64));
        }

        for (key, values) in &filter.tags {
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            if values.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; values.len()].join(",");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM event_tags t WHERE t.event_id = events.id
                   AND t.tag_name = ? AND t.tag_value IN ({placeholders}))"
            ));
            params.push(Box::new(name.to_string()));
            for value in values {
                params.push(Box::new(value.clone()));
            }
        }

        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        sql.push_str(" ORDER BY created_at DESC, id ASC");

        let conn = self.reader()?;
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), map_stored_event)?;

        let mut events = Vec::new();
        for row in rows {
            let stored = row?;
            if filter.matches(&stored.event) {
                events.push(stored);
                if events.len() as u64 >= limit {
                    break;
                }
            }
        }
        Ok(events)
    }

    /// Walk reply parents from `event_id` upward, nearest first, stopping at
    /// `max_depth`, at the first parent not held locally, or on a cycle.
    pub fn ancestors(&self, event_id: &str, max_depth: usize) -> Result<Vec<StoredEvent>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([event_id.to_string()]);

        let Some(start) = self.get_event(event_id)? else {
            return Ok(chain);
        };
        let mut parent = start.derived.reply_to_id.clone();

        while let Some(id) = parent {
            if chain.len() >= max_depth || !visited.insert(id.clone()) {
                break;
            }
            let Some(event) = self.get_event(&id)? else {
                break;
            };
            parent = event.derived.reply_to_id.clone();
            chain.push(event);
        }
        Ok(chain)
    }

    /// Direct replies to an event.
    pub fn replies(&self, event_id: &str) -> Result<Vec<StoredEvent>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE reply_to_id = ?1 AND deleted = 0
             AND kind != 7 ORDER BY created_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map([event_id], map_stored_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Events carrying a hashtag, whether from a `t` tag or inline `#word`.
    pub fn events_with_hashtag(&self, hashtag: &str, limit: usize) -> Result<Vec<StoredEvent>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE id IN (SELECT event_id FROM hashtags WHERE tag = ?1) AND deleted = 0
             ORDER BY curated_at DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![hashtag.to_lowercase(), limit as i64], map_stored_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Events not yet successfully processed. Never-attempted events come
    /// first, oldest first; deferred ones follow in the order they were last
    /// tried.
    pub fn unprocessed(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE processed = 0
             ORDER BY retry_order ASC, created_at ASC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map([limit as i64], map_stored_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn mark_processed(&self, event_id: &str) -> Result<()> {
        let conn = self.writer()?;
        conn.execute("UPDATE events SET processed = 1 WHERE id = ?1", [event_id])?;
        Ok(())
    }

    /// Move a deferred event behind everything else waiting to be retried.
    pub fn mark_deferred(&self, event_id: &str) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "UPDATE events
             SET retry_order = (SELECT COALESCE(MAX(retry_order), 0) + 1 FROM events)
             WHERE id = ?1",
            [event_id],
        )?;
        Ok(())
    }

    /// Locally authored events the given relay has not acknowledged.
    pub fn unseen_local_events(&self, relay_id: RelayId, limit: usize) -> Result<Vec<StoredEvent>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE local = 1 AND deleted = 0
               AND NOT EXISTS (SELECT 1 FROM seen_by_relay s
                               WHERE s.relay_id = ?1 AND s.event_id = events.id)
             ORDER BY created_at ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![relay_id, limit as i64], map_stored_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Ids of details last refreshed more than `max_age` ago.
    pub fn stale_details(&self, kind: DetailKind, max_age: Duration) -> Result<Vec<String>> {
        let cutoff = unix_now().saturating_sub(max_age.as_secs());
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM details WHERE kind = ?1 AND refreshed_at < ?2 ORDER BY refreshed_at ASC",
        )?;
        let ids = stmt
            .query_map(params![kind.as_str(), cutoff as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Mark a detail as refreshed now.
    pub fn touch_detail(&self, id: &str, kind: DetailKind) -> Result<()> {
        self.touch_detail_at(id, kind, unix_now())
    }

    pub(crate) fn touch_detail_at(&self, id: &str, kind: DetailKind, at: u64) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO details (id, kind, refreshed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id, kind) DO UPDATE SET refreshed_at = excluded.refreshed_at",
            params![id, kind.as_str(), at as i64],
        )?;
        Ok(())
    }

    pub fn count_events(&self) -> Result<u64> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn escape_like(prefix: &str) -> String {
    prefix.replace('%', "").replace('_', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{open_store, signed};
    use nostr::{EventTemplate, Keys, Signer};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_query_by_author_prefix_and_kind() {
        let (store, _dir) = open_store();
        let alice = Keys::generate();
        let bob = Keys::generate();
        let a1 = signed(&alice, EventTemplate::new(1, "a1").created_at(10));
        let a2 = signed(&alice, EventTemplate::new(1, "a2").created_at(20));
        let a_meta = signed(&alice, EventTemplate::new(0, "{}").created_at(30));
        let b1 = signed(&bob, EventTemplate::new(1, "b1").created_at(40));
        for event in [&a1, &a2, &a_meta, &b1] {
            store.store_event(event, None).unwrap();
        }

        let filter = Filter::new()
            .authors([&alice.public_key()[..12]])
            .kinds([1]);
        let ids: Vec<String> = store
            .query(&filter)
            .unwrap()
            .into_iter()
            .map(|s| s.event.id)
            .collect();
        assert_eq!(ids, vec![a2.id.clone(), a1.id.clone()]);

        let windowed = Filter::new().kinds([1]).since(20).until(40);
        assert_eq!(store.query(&windowed).unwrap().len(), 2);

        let limited = Filter::new().kinds([1]).limit(1);
        assert_eq!(store.query(&limited).unwrap()[0].event.id, b1.id);
    }

    #[test]
    fn test_query_tags_and_search() {
        let (store, _dir) = open_store();
        let keys = Keys::generate();
        let tagged = signed(
            &keys,
            EventTemplate::new(1, "Rust is Great").tag(["t", "rust"]),
        );
        let other = signed(&keys, EventTemplate::new(1, "nothing here"));
        store.store_event(&tagged, None).unwrap();
        store.store_event(&other, None).unwrap();

        let by_tag = Filter::new().tag("t", ["rust"]);
        assert_eq!(store.query(&by_tag).unwrap().len(), 1);

        let by_search = Filter::new().search("great rust");
        assert_eq!(store.query(&by_search).unwrap()[0].event.id, tagged.id);

        let empty_ids = Filter::new().ids(Vec::<String>::new());
        assert!(store.query(&empty_ids).unwrap().is_empty());
    }

    #[test]
    fn test_ancestors_respects_depth() {
        let (store, _dir) = open_store();
        let keys = Keys::generate();
        let root = signed(&keys, EventTemplate::new(1, "root").created_at(1));
        let mid = signed(
            &keys,
            EventTemplate::new(1, "mid")
                .tag(["e", root.id.as_str(), "", "root"])
                .created_at(2),
        );
        let leaf = signed(
            &keys,
            EventTemplate::new(1, "leaf")
                .tag(["e", root.id.as_str(), "", "root"])
                .tag(["e", mid.id.as_str(), "", "reply"])
                .created_at(3),
        );
        for event in [&root, &mid, &leaf] {
            store.store_event(event, None).unwrap();
        }

        let chain: Vec<String> = store
            .ancestors(&leaf.id, 10)
            .unwrap()
            .into_iter()
            .map(|s| s.event.id)
            .collect();
        assert_eq!(chain, vec![mid.id.clone(), root.id.clone()]);
        assert_eq!(store.ancestors(&leaf.id, 1).unwrap().len(), 1);
        assert!(store.ancestors("missing", 5).unwrap().is_empty());
        assert_eq!(store.replies(&root.id).unwrap()[0].event.id, mid.id);
    }

    #[test]
    fn test_ancestors_stops_at_unknown_parent() {
        let (store, _dir) = open_store();
        let keys = Keys::generate();
        let reply = signed(&keys, EventTemplate::new(1, "orphan").tag(["e", "ab".repeat(32).as_str()]));
        store.store_event(&reply, None).unwrap();
        assert!(store.ancestors(&reply.id, 5).unwrap().is_empty());
    }

    #[test]
    fn test_hashtags_from_content_are_indexed() {
        let (store, _dir) = open_store();
        let keys = Keys::generate();
        let note = signed(&keys, EventTemplate::new(1, "good morning #Nostr"));
        store.store_event(&note, None).unwrap();
        assert_eq!(store.events_with_hashtag("NOSTR", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_stale_details() {
        let (store, _dir) = open_store();
        let now = unix_now();
        store.touch_detail_at("old", DetailKind::Profile, now - 7_200).unwrap();
        store.touch_detail_at("fresh", DetailKind::Profile, now).unwrap();
        store.touch_detail_at("chan", DetailKind::Channel, now - 7_200).unwrap();

        assert_eq!(
            store
                .stale_details(DetailKind::Profile, Duration::from_secs(3_600))
                .unwrap(),
            vec!["old".to_string()]
        );

        store.touch_detail("old", DetailKind::Profile).unwrap();
        assert!(
            store
                .stale_details(DetailKind::Profile, Duration::from_secs(3_600))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_unseen_local_events_per_relay() {
        let (store, _dir) = open_store();
        let keys = Keys::generate();
        let (a, _) = store.ensure_relay("wss://a.example").unwrap();
        let (b, _) = store.ensure_relay("wss://b.example").unwrap();
        let mine = signed(&keys, EventTemplate::new(1, "mine"));
        let theirs = signed(&Keys::generate(), EventTemplate::new(1, "theirs"));
        store.store_local(&mine).unwrap();
        store.store_event(&theirs, Some(a.id)).unwrap();

        store.mark_seen(a.id, &mine.id).unwrap();
        assert!(store.unseen_local_events(a.id, 10).unwrap().is_empty());
        let pending = store.unseen_local_events(b.id, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event.id, mine.id);
    }

    #[test]
    fn test_unprocessed_until_marked() {
        let (store, _dir) = open_store();
        let keys = Keys::generate();
        let note = signed(&keys, EventTemplate::new(1, "n"));
        store.store_event(&note, None).unwrap();
        assert_eq!(store.unprocessed(10).unwrap().len(), 1);
        store.mark_processed(&note.id).unwrap();
        assert!(store.unprocessed(10).unwrap().is_empty());
        assert!(store.contains(&note.id).unwrap());
    }
}
