//! NIP-09: Event Deletion Request

use crate::nip01::{Event, EventTemplate, KIND_EVENT_DELETION};
use crate::nip33::Coordinate;

/// Event ids a deletion asks to remove, in tag order without repeats.
pub fn deleted_event_ids(event: &Event) -> Vec<String> {
    if event.kind != KIND_EVENT_DELETION {
        return Vec::new();
    }
    let mut ids: Vec<String> = Vec::new();
    for id in event.tag_values("e").filter(|id| !id.is_empty()) {
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Addressable coordinates a deletion asks to remove.
pub fn deleted_coordinates(event: &Event) -> Vec<Coordinate> {
    if event.kind != KIND_EVENT_DELETION {
        return Vec::new();
    }
    event
        .tag_values("a")
        .filter_map(|value| value.parse().ok())
        .collect()
}

/// Deletion request for the given ids. `reason` goes in the content.
pub fn deletion_template<I, S>(event_ids: I, reason: &str) -> EventTemplate
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut template = EventTemplate::new(KIND_EVENT_DELETION, reason);
    for id in event_ids {
        template = template.tag(["e", id.as_ref()]);
    }
    template
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deletion(tags: Vec<Vec<&str>>) -> Event {
        Event {
            id: "00".repeat(32),
            pubkey: "aa".repeat(32),
            created_at: 1,
            kind: KIND_EVENT_DELETION,
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(String::from).collect())
                .collect(),
            content: String::new(),
            sig: "00".repeat(64),
        }
    }

    #[test]
    fn test_ids_deduplicated() {
        let event = deletion(vec![vec!["e", "x"], vec!["e", "y"], vec!["e", "x"], vec!["e", ""]]);
        assert_eq!(deleted_event_ids(&event), vec!["x", "y"]);
    }

    #[test]
    fn test_coordinates() {
        let pk = "bb".repeat(32);
        let a = format!("30023:{}:post", pk);
        let event = deletion(vec![vec!["a", &a], vec!["a", "junk"]]);
        let coords = deleted_coordinates(&event);
        assert_eq!(coords.len(), 1);
        assert_eq!(coords[0].identifier.as_deref(), Some("post"));
    }

    #[test]
    fn test_template() {
        let template = deletion_template(["one", "two"], "oops");
        assert_eq!(template.kind, KIND_EVENT_DELETION);
        assert_eq!(template.content, "oops");
        assert_eq!(template.tags.len(), 2);
    }
}
