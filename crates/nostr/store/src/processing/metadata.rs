//! Kind 0 profiles.

use super::{Change, ProcessOutcome};
use crate::db::Store;
use crate::error::Result;
use crate::events::StoredEvent;
use crate::query::DetailKind;
use nostr::ProfileMetadata;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

pub(super) fn apply(store: &Store, stored: &StoredEvent) -> Result<ProcessOutcome> {
    let event = &stored.event;
    let Some(profile) = ProfileMetadata::from_content(&event.content) else {
        debug!(id = %event.id, "kind 0 content is not an object");
        return Ok(ProcessOutcome::done(Vec::new()));
    };

    let changed = {
        let conn = store.writer()?;
        conn.execute(
            "INSERT INTO profiles (pubkey, name, display_name, about, picture, nip05, lud16, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(pubkey) DO UPDATE SET
                 name = excluded.name,
                 display_name = excluded.display_name,
                 about = excluded.about,
                 picture = excluded.picture,
                 nip05 = excluded.nip05,
                 lud16 = excluded.lud16,
                 updated_at = excluded.updated_at
             WHERE excluded.updated_at > profiles.updated_at",
            params![
                event.pubkey,
                profile.name,
                profile.display_name,
                profile.about,
                profile.picture,
                profile.nip05,
                profile.lud16,
                event.created_at as i64
            ],
        )?
    };
    store.touch_detail(&event.pubkey, DetailKind::Profile)?;

    let changes = if changed > 0 {
        vec![Change::AccountDetailChanged {
            pubkey: event.pubkey.clone(),
        }]
    } else {
        Vec::new()
    };
    Ok(ProcessOutcome::done(changes))
}

impl Store {
    pub fn profile(&self, pubkey: &str) -> Result<Option<ProfileMetadata>> {
        let conn = self.reader()?;
        Ok(conn
            .query_row(
                "SELECT name, display_name, about, picture, nip05, lud16 FROM profiles WHERE pubkey = ?1",
                [pubkey],
                |row| {
                    Ok(ProfileMetadata {
                        name: row.get(0)?,
                        display_name: row.get(1)?,
                        about: row.get(2)?,
                        picture: row.get(3)?,
                        nip05: row.get(4)?,
                        lud16: row.get(5)?,
                    })
                },
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_support::{open_store, signed};
    use crate::processing::Change;
    use crate::query::DetailKind;
    use crate::session::Session;
    use nostr::{EventTemplate, Keys, Signer};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_profile_applied_and_detail_touched() {
        let (store, _dir) = open_store();
        let keys = Keys::generate();
        let session = Session::read_only(keys.public_key());
        let meta = signed(
            &keys,
            EventTemplate::new(0, r#"{"name":"satoshi","displayName":"Satoshi","about":7}"#),
        );
        store.store_event(&meta, None).unwrap();

        let outcome = store.process_event(&session, &meta.id).unwrap();
        assert_eq!(
            outcome.changes,
            vec![Change::AccountDetailChanged {
                pubkey: keys.public_key().to_string()
            }]
        );

        let profile = store.profile(keys.public_key()).unwrap().unwrap();
        assert_eq!(profile.name.as_deref(), Some("satoshi"));
        assert_eq!(profile.display_name.as_deref(), Some("Satoshi"));
        assert_eq!(profile.about, None);

        assert!(
            store
                .stale_details(DetailKind::Profile, Duration::from_secs(60))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_non_object_content_is_skipped() {
        let (store, _dir) = open_store();
        let keys = Keys::generate();
        let session = Session::read_only(keys.public_key());
        let meta = signed(&keys, EventTemplate::new(0, "not json"));
        store.store_event(&meta, None).unwrap();
        assert!(store.process_event(&session, &meta.id).unwrap().is_processed());
        assert!(store.profile(keys.public_key()).unwrap().is_none());
    }
}
