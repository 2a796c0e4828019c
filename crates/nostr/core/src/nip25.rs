//! NIP-25: Reactions
//!
//! A kind 7 event reacts to the event named by its last `e` tag. Content `+`
//! (or empty) is a like, `-` a dislike, anything else an emoji reaction.

use crate::nip01::{Event, EventTemplate, KIND_REACTION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Like,
    Dislike,
    Emoji(String),
}

impl Reaction {
    pub fn from_content(content: &str) -> Self {
        match content.trim() {
            "" | "+" => Reaction::Like,
            "-" => Reaction::Dislike,
            other => Reaction::Emoji(other.to_string()),
        }
    }

    pub fn as_content(&self) -> &str {
        match self {
            Reaction::Like => "+",
            Reaction::Dislike => "-",
            Reaction::Emoji(e) => e,
        }
    }
}

/// Id of the event being reacted to.
pub fn reaction_target(event: &Event) -> Option<&str> {
    if event.kind != KIND_REACTION {
        return None;
    }
    event.tag_values("e").filter(|id| !id.is_empty()).last()
}

/// Reaction to `target`, tagging its author as NIP-25 asks.
pub fn reaction_template(target: &Event, reaction: &Reaction) -> EventTemplate {
    EventTemplate::new(KIND_REACTION, reaction.as_content())
        .tag(["e", target.id.as_str()])
        .tag(["p", target.pubkey.as_str()])
}
