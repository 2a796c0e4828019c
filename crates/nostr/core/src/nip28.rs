//! NIP-28: Public Chat
//!
//! Kind 40 creates a channel (the channel id is the creation event's id), kind 41
//! updates its metadata and kind 42 posts a message. Both 41 and 42 point at the
//! channel with an `e` tag, marked `root` by current clients.

use crate::nip01::{
    Event, KIND_CHANNEL_CREATION, KIND_CHANNEL_MESSAGE, KIND_CHANNEL_METADATA,
};
use crate::nip10::{ETagMarker, EventReference};
use serde::{Deserialize, Serialize};

/// Channel metadata carried as JSON in kind 40 and 41 content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl ChannelMetadata {
    /// Parse metadata content, tolerating junk by returning empty metadata.
    pub fn from_content(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_default()
    }
}

/// The channel an event belongs to.
pub fn channel_id(event: &Event) -> Option<String> {
    match event.kind {
        KIND_CHANNEL_CREATION => Some(event.id.clone()),
        KIND_CHANNEL_METADATA | KIND_CHANNEL_MESSAGE => {
            let refs: Vec<EventReference> = event
                .tags_named("e")
                .filter_map(|tag| EventReference::from_tag(tag).ok())
                .collect();
            refs.iter()
                .find(|r| r.marker == Some(ETagMarker::Root))
                .or_else(|| refs.first())
                .map(|r| r.event_id.clone())
        }
        _ => None,
    }
}
