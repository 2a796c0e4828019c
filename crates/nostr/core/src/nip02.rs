//! NIP-02: Follow List
//!
//! A kind 3 event lists followed profiles as `["p", <pubkey>, <relay>?, <petname>?]`.
//! The whole list is replaced on every publish, so readers keep only the newest.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/02.md>

use crate::nip01::{Event, EventTemplate, KIND_CONTACTS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Nip02Error {
    #[error("invalid event kind: expected 3, got {0}")]
    InvalidKind(u16),

    #[error("invalid p-tag: {0}")]
    InvalidPTag(String),
}

/// A single followed profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub pubkey: String,
    pub relay_url: Option<String>,
    pub petname: Option<String>,
}

impl Contact {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            relay_url: None,
            petname: None,
        }
    }

    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec![
            "p".to_string(),
            self.pubkey.clone(),
            self.relay_url.clone().unwrap_or_default(),
        ];
        if let Some(ref petname) = self.petname {
            tag.push(petname.clone());
        }
        tag
    }

    /// Parse a `p` tag. The pubkey must be 64 hex characters.
    pub fn from_tag(tag: &[String]) -> Result<Self, Nip02Error> {
        if tag.first().map(String::as_str) != Some("p") {
            return Err(Nip02Error::InvalidPTag("tag must start with 'p'".to_string()));
        }
        let pubkey = tag
            .get(1)
            .ok_or_else(|| Nip02Error::InvalidPTag("missing pubkey".to_string()))?;
        if pubkey.len() != 64 || !pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Nip02Error::InvalidPTag(format!(
                "pubkey must be 64-character hex, got: {}",
                pubkey
            )));
        }
        let non_empty = |i: usize| tag.get(i).filter(|s| !s.is_empty()).cloned();

        Ok(Self {
            pubkey: pubkey.to_lowercase(),
            relay_url: non_empty(2),
            petname: non_empty(3),
        })
    }
}

/// Contacts of a kind 3 event. Invalid tags are skipped and repeated pubkeys
/// keep their first occurrence.
pub fn contacts_from_event(event: &Event) -> Result<Vec<Contact>, Nip02Error> {
    if event.kind != KIND_CONTACTS {
        return Err(Nip02Error::InvalidKind(event.kind));
    }
    let mut seen = HashSet::new();
    Ok(event
        .tags_named("p")
        .filter_map(|tag| Contact::from_tag(tag).ok())
        .filter(|contact| seen.insert(contact.pubkey.clone()))
        .collect())
}

/// Template for a follow list. `content` traditionally holds relay preferences.
pub fn contact_list_template(contacts: &[Contact], content: impl Into<String>) -> EventTemplate {
    let mut template = EventTemplate::new(KIND_CONTACTS, content);
    template.tags = contacts.iter().map(Contact::to_tag).collect();
    template
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(c: char) -> String {
        std::iter::repeat_n(c, 64).collect()
    }

    fn contact_event(tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "00".repeat(32),
            pubkey: pk('a'),
            created_at: 1,
            kind: KIND_CONTACTS,
            tags,
            content: String::new(),
            sig: "00".repeat(64),
        }
    }

    #[test]
    fn test_contacts_from_event() {
        let event = contact_event(vec![
            vec!["p".into(), pk('b'), "wss://relay".into(), "bob".into()],
            vec!["p".into(), pk('c')],
            vec!["p".into(), "short".into()],
            vec!["p".into(), pk('b')],
            vec!["t".into(), "x".into()],
        ]);
        let contacts = contacts_from_event(&event).unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].petname.as_deref(), Some("bob"));
        assert_eq!(contacts[0].relay_url.as_deref(), Some("wss://relay"));
        assert_eq!(contacts[1].relay_url, None);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let mut event = contact_event(vec![]);
        event.kind = 1;
        assert!(matches!(
            contacts_from_event(&event),
            Err(Nip02Error::InvalidKind(1))
        ));
    }

    #[test]
    fn test_template_tags() {
        let mut contact = Contact::new(pk('d'));
        contact.petname = Some("dan".to_string());
        let template = contact_list_template(&[contact], "");
        assert_eq!(template.kind, KIND_CONTACTS);
        assert_eq!(template.tags[0], vec!["p".to_string(), pk('d'), String::new(), "dan".to_string()]);
    }
}
