//! NIP-18: Reposts
//!
//! Kind 6 reposts a kind 1 note, kind 16 reposts anything else. The target is
//! the first `e` tag; the content may carry the reposted event as JSON.

use crate::nip01::{Event, KIND_GENERIC_REPOST, KIND_REPOST};

pub fn is_repost(event: &Event) -> bool {
    event.kind == KIND_REPOST || event.kind == KIND_GENERIC_REPOST
}

/// Id of the reposted event.
pub fn repost_target(event: &Event) -> Option<&str> {
    if !is_repost(event) {
        return None;
    }
    event.first_tag_value("e").filter(|id| !id.is_empty())
}

/// The reposted event embedded in the content, when present and consistent with
/// the `e` tag. The caller still has to verify it.
pub fn embedded_event(event: &Event) -> Option<Event> {
    if !is_repost(event) || event.content.trim().is_empty() {
        return None;
    }
    let inner: Event = serde_json::from_str(&event.content).ok()?;
    match repost_target(event) {
        Some(target) if target != inner.id => None,
        _ => Some(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repost(tags: Vec<Vec<String>>, content: String) -> Event {
        Event {
            id: "11".repeat(32),
            pubkey: "aa".repeat(32),
            created_at: 2,
            kind: KIND_REPOST,
            tags,
            content,
            sig: "00".repeat(64),
        }
    }

    fn note() -> Event {
        Event {
            id: "22".repeat(32),
            pubkey: "bb".repeat(32),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "original".to_string(),
            sig: "00".repeat(64),
        }
    }

    #[test]
    fn test_target_and_embedded() {
        let inner = note();
        let event = repost(
            vec![vec!["e".into(), inner.id.clone()], vec!["p".into(), inner.pubkey.clone()]],
            serde_json::to_string(&inner).unwrap(),
        );
        assert_eq!(repost_target(&event), Some(inner.id.as_str()));
        assert_eq!(embedded_event(&event), Some(inner));
    }

    #[test]
    fn test_mismatched_embedded_event_ignored() {
        let inner = note();
        let event = repost(
            vec![vec!["e".into(), "33".repeat(32)]],
            serde_json::to_string(&inner).unwrap(),
        );
        assert_eq!(embedded_event(&event), None);
    }

    #[test]
    fn test_empty_content() {
        let event = repost(vec![vec!["e".into(), "22".repeat(32)]], String::new());
        assert_eq!(embedded_event(&event), None);
        assert!(repost_target(&event).is_some());
    }
}
