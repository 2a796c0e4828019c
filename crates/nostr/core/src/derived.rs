//! Fields derived from an event's tags and content.
//!
//! Computed once when an event is ingested and stored alongside it, so readers
//! never re-parse tags.

use crate::nip01::{Event, KIND_SHORT_TEXT_NOTE};
use crate::{nip04, nip10, nip13, nip18, nip25, nip27, nip28, nip33};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derived {
    /// Direct parent of a reply, or the reacted-to event of a reaction
    pub reply_to_id: Option<String>,
    /// Thread root
    pub root_id: Option<String>,
    pub channel_id: Option<String>,
    pub repost_of: Option<String>,
    /// Recipient of a direct message
    pub dm_peer: Option<String>,
    pub replaceable_id: Option<String>,
    pub pow_difficulty: u32,
    pub hashtags: Vec<String>,
    pub mention_indices: Vec<usize>,
    pub relay_urls: Vec<String>,
}

impl Derived {
    pub fn from_event(event: &Event) -> Self {
        let mut derived = Derived {
            replaceable_id: nip33::event_replaceable_id(event),
            pow_difficulty: nip13::effective_difficulty(event),
            channel_id: nip28::channel_id(event),
            repost_of: nip18::repost_target(event).map(str::to_string),
            dm_peer: nip04::recipient(event).map(str::to_string),
            ..Default::default()
        };

        if let Some(target) = nip25::reaction_target(event) {
            derived.reply_to_id = Some(target.to_string());
        }

        if event.kind == KIND_SHORT_TEXT_NOTE || event.kind == crate::KIND_CHANNEL_MESSAGE {
            let thread = nip10::thread_refs(&event.tags);
            derived.root_id = thread.root_id().map(str::to_string);
            derived.reply_to_id = thread.reply_id().map(str::to_string);
            derived.hashtags = nip27::hashtags(event);
            derived.mention_indices = nip27::mention_indices(&event.content, event.tags.len());
            derived.relay_urls = nip27::relay_urls(event);
        }

        // A channel message's root tag names the channel, not a thread.
        if event.kind == crate::KIND_CHANNEL_MESSAGE && derived.root_id == derived.channel_id {
            derived.root_id = None;
            if derived.reply_to_id == derived.channel_id {
                derived.reply_to_id = None;
            }
        }

        derived
    }
}
