//! NIP-10: Text Notes and Threads
//!
//! Resolves which event a note replies to and which thread it belongs to.
//! Marked `e` tags (`root`, `reply`, `mention`) take precedence. Notes from older
//! clients carry unmarked tags, which are read positionally:
//! - one unmarked `e` tag: it is the reply target and the root
//! - several: the first is the root, the last is the reply target, the rest
//!   are mentions
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/10.md>

use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Nip10Error {
    #[error("invalid e-tag format: {0}")]
    InvalidETag(String),
}

/// E-tag marker types for thread structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ETagMarker {
    Root,
    Reply,
    Mention,
}

impl ETagMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            ETagMarker::Root => "root",
            ETagMarker::Reply => "reply",
            ETagMarker::Mention => "mention",
        }
    }
}

impl FromStr for ETagMarker {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(ETagMarker::Root),
            "reply" => Ok(ETagMarker::Reply),
            "mention" => Ok(ETagMarker::Mention),
            _ => Err(()),
        }
    }
}

/// An `e` tag reference to another event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReference {
    pub event_id: String,
    /// Recommended relay URL
    pub relay_url: Option<String>,
    pub marker: Option<ETagMarker>,
    /// Author of the referenced event
    pub author_pubkey: Option<String>,
}

impl EventReference {
    /// Parse `["e", <id>, <relay>?, <marker>?, <pubkey>?]`.
    pub fn from_tag(tag: &[String]) -> Result<Self, Nip10Error> {
        if tag.first().map(String::as_str) != Some("e") {
            return Err(Nip10Error::InvalidETag("tag must start with 'e'".to_string()));
        }
        let event_id = tag
            .get(1)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Nip10Error::InvalidETag("e-tag must have an event id".to_string()))?
            .clone();

        let non_empty = |i: usize| tag.get(i).filter(|s| !s.is_empty()).cloned();

        Ok(Self {
            event_id,
            relay_url: non_empty(2),
            marker: non_empty(3).and_then(|m| ETagMarker::from_str(&m).ok()),
            author_pubkey: non_empty(4),
        })
    }

    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec![
            "e".to_string(),
            self.event_id.clone(),
            self.relay_url.clone().unwrap_or_default(),
        ];
        if let Some(marker) = self.marker {
            tag.push(marker.as_str().to_string());
            if let Some(ref pubkey) = self.author_pubkey {
                tag.push(pubkey.clone());
            }
        }
        tag
    }
}

/// Thread position of a note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadRefs {
    pub root: Option<EventReference>,
    pub reply: Option<EventReference>,
    pub mentions: Vec<EventReference>,
}

impl ThreadRefs {
    pub fn root_id(&self) -> Option<&str> {
        self.root.as_ref().map(|r| r.event_id.as_str())
    }

    pub fn reply_id(&self) -> Option<&str> {
        self.reply.as_ref().map(|r| r.event_id.as_str())
    }
}

/// Work out root, reply target and mentions from a tag list. Malformed `e` tags
/// are skipped.
pub fn thread_refs(tags: &[Vec<String>]) -> ThreadRefs {
    let refs: Vec<EventReference> = tags
        .iter()
        .filter(|tag| tag.first().map(String::as_str) == Some("e"))
        .filter_map(|tag| EventReference::from_tag(tag).ok())
        .collect();

    let marked = refs
        .iter()
        .any(|r| matches!(r.marker, Some(ETagMarker::Root | ETagMarker::Reply)));

    if marked {
        let root = refs
            .iter()
            .find(|r| r.marker == Some(ETagMarker::Root))
            .cloned();
        // A note marking only a root replies directly to that root.
        let reply = refs
            .iter()
            .find(|r| r.marker == Some(ETagMarker::Reply))
            .cloned()
            .or_else(|| root.clone());
        let mentions = refs
            .into_iter()
            .filter(|r| !matches!(r.marker, Some(ETagMarker::Root | ETagMarker::Reply)))
            .collect();
        return ThreadRefs {
            root,
            reply,
            mentions,
        };
    }

    let (positional, mentions): (Vec<_>, Vec<_>) = refs
        .into_iter()
        .partition(|r| r.marker != Some(ETagMarker::Mention));

    match positional.len() {
        0 => ThreadRefs {
            root: None,
            reply: None,
            mentions,
        },
        1 => ThreadRefs {
            root: positional.first().cloned(),
            reply: positional.first().cloned(),
            mentions,
        },
        n => {
            let mut mentions = mentions;
            mentions.extend(positional[1..n - 1].iter().cloned());
            ThreadRefs {
                root: positional.first().cloned(),
                reply: positional.last().cloned(),
                mentions,
            }
        }
    }
}

/// Pubkeys from `p` tags, in tag order.
pub fn mentioned_pubkeys(tags: &[Vec<String>]) -> Vec<String> {
    tags.iter()
        .filter(|tag| tag.first().map(String::as_str) == Some("p"))
        .filter_map(|tag| tag.get(1).cloned())
        .collect()
}
