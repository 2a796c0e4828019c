//! NIP-04: Encrypted Direct Message addressing.
//!
//! Only the routing side lives here: who the other participant is and how a
//! conversation is keyed. Encryption goes through [`crate::Signer`].

use crate::nip01::{Event, EventTemplate, KIND_ENCRYPTED_DIRECT_MESSAGE};

/// The recipient named by the first `p` tag.
pub fn recipient(event: &Event) -> Option<&str> {
    if event.kind != KIND_ENCRYPTED_DIRECT_MESSAGE {
        return None;
    }
    event.first_tag_value("p").filter(|p| !p.is_empty())
}

/// The participant of a DM other than `me`. When `me` is neither sender nor
/// recipient the recipient is reported.
pub fn peer_of<'a>(event: &'a Event, me: &str) -> Option<&'a str> {
    let recipient = recipient(event)?;
    if event.pubkey == me {
        Some(recipient)
    } else if recipient == me {
        Some(event.pubkey.as_str())
    } else {
        Some(recipient)
    }
}

/// Canonical conversation key: the two pubkeys in ascending order.
pub fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Template for an already encrypted payload addressed to `recipient`.
pub fn direct_message_template(recipient: &str, encrypted_content: impl Into<String>) -> EventTemplate {
    EventTemplate::new(KIND_ENCRYPTED_DIRECT_MESSAGE, encrypted_content).tag(["p", recipient])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dm(from: &str, to: &str) -> Event {
        Event {
            id: "00".repeat(32),
            pubkey: from.to_string(),
            created_at: 1,
            kind: KIND_ENCRYPTED_DIRECT_MESSAGE,
            tags: vec![vec!["p".to_string(), to.to_string()]],
            content: "cipher?iv=x".to_string(),
            sig: "00".repeat(64),
        }
    }

    #[test]
    fn test_peer_from_both_sides() {
        let event = dm("alice", "bob");
        assert_eq!(peer_of(&event, "alice"), Some("bob"));
        assert_eq!(peer_of(&event, "bob"), Some("alice"));
        assert_eq!(peer_of(&event, "carol"), Some("bob"));
    }

    #[test]
    fn test_pair_key_is_symmetric() {
        assert_eq!(pair_key("b", "a"), ("a", "b"));
        assert_eq!(pair_key("a", "b"), ("a", "b"));
    }

    #[test]
    fn test_non_dm_has_no_recipient() {
        let mut event = dm("alice", "bob");
        event.kind = 1;
        assert_eq!(recipient(&event), None);
    }
}
