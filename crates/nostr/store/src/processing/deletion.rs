//! Kind 5 deletion requests.
//!
//! A deletion only takes effect on events by the same author. Targets that
//! haven't arrived yet keep the request pending so it can be applied once
//! they do.

use super::{Change, ProcessOutcome};
use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::events::StoredEvent;
use crate::session::Session;
use nostr::EventTemplate;
use nostr::nip09::{deleted_coordinates, deleted_event_ids, deletion_template};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

pub(super) fn apply(store: &Store, stored: &StoredEvent) -> Result<ProcessOutcome> {
    let deletion = &stored.event;
    let mut changes = Vec::new();
    let mut waiting_on = None;

    for target_id in deleted_event_ids(deletion) {
        let Some(target) = store.get_event(&target_id)? else {
            waiting_on.get_or_insert(target_id);
            continue;
        };
        if target.event.pubkey != deletion.pubkey {
            debug!(deletion = %deletion.id, target = %target_id, "ignoring deletion of another author's event");
            continue;
        }
        if !target.deleted && store.tombstone(&target_id)? {
            changes.push(Change::EventDeleted { event_id: target_id });
        }
    }

    for coordinate in deleted_coordinates(deletion) {
        if coordinate.pubkey != deletion.pubkey {
            continue;
        }
        let Ok(replaceable_id) = coordinate.replaceable_id() else {
            continue;
        };
        let target: Option<(String, i64)> = {
            let conn = store.reader()?;
            conn.query_row(
                "SELECT id, created_at FROM events WHERE replaceable_id = ?1 AND deleted = 0",
                [&replaceable_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };
        if let Some((id, created_at)) = target
            && created_at as u64 <= deletion.created_at
            && store.tombstone(&id)?
        {
            changes.push(Change::EventDeleted { event_id: id });
        }
    }

    Ok(match waiting_on {
        Some(id) => ProcessOutcome::pending(id, changes),
        None => ProcessOutcome::done(changes),
    })
}

impl Store {
    /// Tombstone an event: keep the row so the id stays known, drop its
    /// content and stop offering it anywhere. Returns false if it was already
    /// gone.
    fn tombstone(&self, event_id: &str) -> Result<bool> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE events SET deleted = 1, processed = 1, content = '' WHERE id = ?1 AND deleted = 0",
            [event_id],
        )?;
        conn.execute("DELETE FROM hashtags WHERE event_id = ?1", [event_id])?;
        if changed > 0 {
            info!("Deleted event {}", event_id);
        }
        Ok(changed > 0)
    }

    /// Build a deletion request for events owned by the session account.
    ///
    /// Fails with [`StoreError::NotAuthor`] if any target belongs to someone
    /// else, and [`StoreError::UnknownEvent`] if any is not stored.
    pub fn deletion_for(
        &self,
        session: &Session,
        event_ids: &[String],
        reason: &str,
    ) -> Result<EventTemplate> {
        for id in event_ids {
            let target = self
                .get_event(id)?
                .ok_or_else(|| StoreError::UnknownEvent(id.clone()))?;
            if target.event.pubkey != session.pubkey {
                return Err(StoreError::NotAuthor {
                    event_id: id.clone(),
                    pubkey: session.pubkey.clone(),
                });
            }
        }
        Ok(deletion_template(event_ids, reason))
    }

    /// Whether a deletion by `pubkey` is stored for `event_id`, applied or not.
    pub fn has_deletion_request(&self, pubkey: &str, event_id: &str) -> Result<bool> {
        let conn = self.reader()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM events e JOIN event_tags t ON t.event_id = e.id
                 WHERE e.kind = 5 AND e.pubkey = ?1 AND t.tag_name = 'e' AND t.tag_value = ?2
                 LIMIT 1",
                params![pubkey, event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_support::{open_store, signed};
    use crate::error::StoreError;
    use crate::processing::{Change, ProcessStatus};
    use crate::session::Session;
    use nostr::nip09::deletion_template;
    use nostr::{EventTemplate, Keys, Signer};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_deletion_waits_for_target_then_applies() {
        let (store, _dir) = open_store();
        let author = Keys::generate();
        let session = Session::read_only(author.public_key());
        let note = signed(&author, EventTemplate::new(1, "oops").created_at(100));
        let deletion = signed(&author, deletion_template([&note.id], "").created_at(200));

        store.store_event(&deletion, None).unwrap();
        let outcome = store.process_event(&session, &deletion.id).unwrap();
        assert_eq!(
            outcome.status,
            ProcessStatus::Pending {
                waiting_on: note.id.clone()
            }
        );
        assert!(!store.get_event(&deletion.id).unwrap().unwrap().processed);
        assert!(store.has_deletion_request(author.public_key(), &note.id).unwrap());

        store.store_event(&note, None).unwrap();
        store.process_event(&session, &note.id).unwrap();
        let changes = store.process_pending(&session, 10).unwrap();
        assert_eq!(
            changes,
            vec![Change::EventDeleted {
                event_id: note.id.clone()
            }]
        );

        let target = store.get_event(&note.id).unwrap().unwrap();
        assert!(target.deleted);
        assert!(target.event.content.is_empty());
        assert!(store.get_event(&deletion.id).unwrap().unwrap().processed);
    }

    #[test]
    fn test_deletion_by_other_author_ignored() {
        let (store, _dir) = open_store();
        let author = Keys::generate();
        let stranger = Keys::generate();
        let session = Session::read_only(author.public_key());
        let note = signed(&author, EventTemplate::new(1, "mine"));
        let deletion = signed(&stranger, deletion_template([&note.id], ""));
        store.store_event(&note, None).unwrap();
        store.store_event(&deletion, None).unwrap();

        let outcome = store.process_event(&session, &deletion.id).unwrap();
        assert!(outcome.is_processed());
        assert!(outcome.changes.is_empty());
        assert!(!store.get_event(&note.id).unwrap().unwrap().deleted);
    }

    #[test]
    fn test_deleted_event_excluded_from_queries_and_outbound() {
        let (store, _dir) = open_store();
        let author = Keys::generate();
        let session = Session::read_only(author.public_key());
        let (relay, _) = store.ensure_relay("wss://r.example").unwrap();
        let note = signed(&author, EventTemplate::new(1, "local"));
        store.store_local(&note).unwrap();
        assert_eq!(store.unseen_local_events(relay.id, 10).unwrap().len(), 1);

        let deletion = signed(&author, deletion_template([&note.id], "typo"));
        store.store_local(&deletion).unwrap();
        store.process_event(&session, &deletion.id).unwrap();

        let pending: Vec<String> = store
            .unseen_local_events(relay.id, 10)
            .unwrap()
            .into_iter()
            .map(|s| s.event.id)
            .collect();
        assert_eq!(pending, vec![deletion.id.clone()]);
        assert!(store.query(&nostr::Filter::new().kinds([1])).unwrap().is_empty());
    }

    #[test]
    fn test_addressable_deletion_by_coordinate() {
        let (store, _dir) = open_store();
        let author = Keys::generate();
        let session = Session::read_only(author.public_key());
        let article = signed(
            &author,
            EventTemplate::new(30023, "draft").tag(["d", "post"]).created_at(10),
        );
        let coordinate = format!("30023:{}:post", author.public_key());
        let deletion = signed(
            &author,
            EventTemplate::new(5, "").tag(["a", coordinate.as_str()]).created_at(20),
        );
        store.store_event(&article, None).unwrap();
        store.store_event(&deletion, None).unwrap();

        let outcome = store.process_event(&session, &deletion.id).unwrap();
        assert_eq!(
            outcome.changes,
            vec![Change::EventDeleted {
                event_id: article.id.clone()
            }]
        );
    }

    #[test]
    fn test_deletion_for_foreign_event_is_refused() {
        let (store, _dir) = open_store();
        let me = Arc::new(Keys::generate());
        let other = Keys::generate();
        let session = Session::with_signer(me.clone());
        let mine = signed(&me, EventTemplate::new(1, "mine"));
        let theirs = signed(&other, EventTemplate::new(1, "theirs"));
        store.store_event(&mine, None).unwrap();
        store.store_event(&theirs, None).unwrap();

        let template = store
            .deletion_for(&session, &[mine.id.clone()], "bye")
            .unwrap();
        assert_eq!(template.kind, 5);
        assert_eq!(template.tags, vec![vec!["e".to_string(), mine.id.clone()]]);

        let err = store
            .deletion_for(&session, &[mine.id.clone(), theirs.id.clone()], "")
            .unwrap_err();
        assert!(matches!(err, StoreError::NotAuthor { event_id, .. } if event_id == theirs.id));

        assert!(matches!(
            store.deletion_for(&session, &["ff".repeat(32)], ""),
            Err(StoreError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_orphaned_deletions_do_not_starve_newer_ones() {
        let (store, _dir) = open_store();
        let author = Keys::generate();
        let session = Session::read_only(author.public_key());
        let orphans: Vec<_> = (1..=3u64)
            .map(|i| {
                let missing = format!("{:064x}", i);
                signed(&author, deletion_template([&missing], "").created_at(i))
            })
            .collect();
        for orphan in &orphans {
            store.store_event(orphan, None).unwrap();
        }
        let note = signed(&author, EventTemplate::new(1, "later regret").created_at(50));
        let deletion = signed(&author, deletion_template([&note.id], "").created_at(100));
        store.store_event(&deletion, None).unwrap();
        store.store_event(&note, None).unwrap();

        for _ in 0..3 {
            store.process_pending(&session, 3).unwrap();
        }

        assert!(store.get_event(&deletion.id).unwrap().unwrap().processed);
        assert!(store.get_event(&note.id).unwrap().unwrap().deleted);
        for orphan in &orphans {
            assert!(!store.get_event(&orphan.id).unwrap().unwrap().processed);
        }
        assert_eq!(store.unprocessed(10).unwrap().len(), orphans.len());
    }
}
