//! NIP-28 channel creation (40) and metadata updates (41).

use super::{Change, ProcessOutcome};
use crate::db::Store;
use crate::error::Result;
use crate::events::StoredEvent;
use crate::query::DetailKind;
use nostr::nip28::ChannelMetadata;
use nostr::{KIND_CHANNEL_CREATION, KIND_CHANNEL_METADATA};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A public chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub creator: String,
    pub metadata: ChannelMetadata,
    pub updated_at: u64,
}

pub(super) fn apply(store: &Store, stored: &StoredEvent) -> Result<ProcessOutcome> {
    let event = &stored.event;
    let Some(channel_id) = stored.derived.channel_id.as_deref() else {
        return Ok(ProcessOutcome::done(Vec::new()));
    };
    let metadata = ChannelMetadata::from_content(&event.content);

    let changed = match event.kind {
        KIND_CHANNEL_CREATION => store.upsert_channel(channel_id, &event.pubkey, &metadata, event.created_at)?,
        KIND_CHANNEL_METADATA => {
            let Some(channel) = store.channel(channel_id)? else {
                return Ok(ProcessOutcome::pending(channel_id, Vec::new()));
            };
            if channel.creator != event.pubkey {
                debug!(id = %event.id, %channel_id, "ignoring metadata update from non-creator");
                return Ok(ProcessOutcome::done(Vec::new()));
            }
            store.upsert_channel(channel_id, &channel.creator, &metadata, event.created_at)?
        }
        _ => false,
    };

    if !changed {
        return Ok(ProcessOutcome::done(Vec::new()));
    }
    store.touch_detail(channel_id, DetailKind::Channel)?;
    Ok(ProcessOutcome::done(vec![Change::ChannelDetailChanged {
        channel_id: channel_id.to_string(),
    }]))
}

impl Store {
    fn upsert_channel(
        &self,
        id: &str,
        creator: &str,
        metadata: &ChannelMetadata,
        updated_at: u64,
    ) -> Result<bool> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "INSERT INTO channels (id, creator, name, about, picture, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 about = excluded.about,
                 picture = excluded.picture,
                 updated_at = excluded.updated_at
             WHERE excluded.updated_at > channels.updated_at",
            params![
                id,
                creator,
                metadata.name,
                metadata.about,
                metadata.picture,
                updated_at as i64
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn channel(&self, id: &str) -> Result<Option<Channel>> {
        let conn = self.reader()?;
        Ok(conn
            .query_row(
                "SELECT id, creator, name, about, picture, updated_at FROM channels WHERE id = ?1",
                [id],
                |row| {
                    Ok(Channel {
                        id: row.get(0)?,
                        creator: row.get(1)?,
                        metadata: ChannelMetadata {
                            name: row.get(2)?,
                            about: row.get(3)?,
                            picture: row.get(4)?,
                        },
                        updated_at: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_support::{open_store, signed};
    use crate::processing::{Change, ProcessStatus};
    use crate::session::Session;
    use nostr::{EventTemplate, Keys, Signer};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_channel_lifecycle() {
        let (store, _dir) = open_store();
        let owner = Keys::generate();
        let other = Keys::generate();
        let session = Session::read_only(owner.public_key());

        let create = signed(
            &owner,
            EventTemplate::new(40, r#"{"name":"rust","about":"crabs"}"#).created_at(10),
        );
        let update = signed(
            &owner,
            EventTemplate::new(41, r#"{"name":"rustaceans"}"#)
                .tag(["e", create.id.as_str(), "", "root"])
                .created_at(20),
        );
        let hijack = signed(
            &other,
            EventTemplate::new(41, r#"{"name":"mine now"}"#)
                .tag(["e", create.id.as_str(), "", "root"])
                .created_at(30),
        );

        // The update arrives first and waits for the channel.
        store.store_event(&update, None).unwrap();
        assert!(matches!(
            store.process_event(&session, &update.id).unwrap().status,
            ProcessStatus::Pending { .. }
        ));

        store.store_event(&create, None).unwrap();
        let outcome = store.process_event(&session, &create.id).unwrap();
        assert_eq!(
            outcome.changes,
            vec![Change::ChannelDetailChanged {
                channel_id: create.id.clone()
            }]
        );

        store.process_pending(&session, 10).unwrap();
        store.store_event(&hijack, None).unwrap();
        store.process_event(&session, &hijack.id).unwrap();

        let channel = store.channel(&create.id).unwrap().unwrap();
        assert_eq!(channel.creator, owner.public_key());
        assert_eq!(channel.metadata.name.as_deref(), Some("rustaceans"));
        assert_eq!(channel.updated_at, 20);
    }
}
