//! NIP-27: Text Note References, plus the other content scans a client runs on
//! incoming notes.
//!
//! - Legacy mention indices: `#[n]` in the content points at tag `n`.
//! - Hashtags: `t` tags and `#word` tokens in the content.
//! - Relay URLs: `r` tags, relay hints on `e`/`p` tags and `ws(s)://` links in
//!   the content. These feed relay discovery.

use crate::nip01::Event;

/// Tag indices referenced with `#[n]`, in content order without repeats.
/// Indices that don't name an existing tag are dropped.
pub fn mention_indices(content: &str, tag_count: usize) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find("#[") {
        let after = &rest[start + 2..];
        let Some(end) = after.find(']') else {
            break;
        };
        if let Ok(index) = after[..end].parse::<usize>()
            && index < tag_count
            && !indices.contains(&index)
        {
            indices.push(index);
        }
        rest = &after[end + 1..];
    }

    indices
}

/// Lowercased hashtags from `t` tags and the content, first occurrence order.
pub fn hashtags(event: &Event) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: &str| {
        let tag = tag.to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    for value in event.tag_values("t") {
        push(value);
    }

    for (i, _) in event.content.match_indices('#') {
        let preceded_by_word = event.content[..i]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if preceded_by_word {
            continue;
        }
        let word: String = event.content[i + 1..]
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        // `#[0]` mentions and bare digits are not hashtags
        if word.chars().any(|c| !c.is_ascii_digit()) {
            push(&word);
        }
    }

    tags
}

/// Normalized relay URLs mentioned anywhere in the event.
pub fn relay_urls(event: &Event) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        if let Some(url) = normalize_relay_url(candidate)
            && !urls.contains(&url)
        {
            urls.push(url);
        }
    };

    for tag in &event.tags {
        match tag.first().map(String::as_str) {
            Some("r") => {
                if let Some(url) = tag.get(1) {
                    push(url);
                }
            }
            Some("e") | Some("p") => {
                if let Some(hint) = tag.get(2) {
                    push(hint);
                }
            }
            _ => {}
        }
    }

    for word in event.content.split_whitespace() {
        if word.starts_with("wss://") || word.starts_with("ws://") {
            push(word.trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | '!' | '?')));
        }
    }

    urls
}

/// Lowercase scheme and host, drop a trailing slash. Anything that isn't a
/// `ws://` or `wss://` URL with a host is rejected.
pub fn normalize_relay_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (scheme, rest) = raw.split_once("://")?;
    let scheme = scheme.to_lowercase();
    if scheme != "ws" && scheme != "wss" {
        return None;
    }
    let (host, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    let path = path.trim_end_matches('/');
    Some(format!("{}://{}{}", scheme, host.to_lowercase(), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn note(tags: Vec<Vec<&str>>, content: &str) -> Event {
        Event {
            id: "00".repeat(32),
            pubkey: "aa".repeat(32),
            created_at: 1,
            kind: 1,
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(String::from).collect())
                .collect(),
            content: content.to_string(),
            sig: "00".repeat(64),
        }
    }

    #[test]
    fn test_mention_indices() {
        assert_eq!(mention_indices("hi #[1] and #[0] and #[1]", 2), vec![1, 0]);
        assert_eq!(mention_indices("out of range #[5]", 2), Vec::<usize>::new());
        assert_eq!(mention_indices("broken #[x] #[", 3), Vec::<usize>::new());
    }

    #[test]
    fn test_hashtags_from_tags_and_content() {
        let event = note(
            vec![vec!["t", "Nostr"]],
            "gm #nostr #Rust_lang, issue#12 #[0] #2024",
        );
        assert_eq!(hashtags(&event), vec!["nostr", "rust_lang"]);
    }

    #[test]
    fn test_relay_urls() {
        let event = note(
            vec![
                vec!["r", "wss://Relay.Example.com/"],
                vec!["e", "id", "wss://hint.example"],
                vec!["p", "pk", ""],
            ],
            "try wss://content.example, or https://not-a-relay.example",
        );
        assert_eq!(
            relay_urls(&event),
            vec![
                "wss://relay.example.com",
                "wss://hint.example",
                "wss://content.example"
            ]
        );
    }

    #[test]
    fn test_normalize_relay_url() {
        assert_eq!(normalize_relay_url("WSS://A.b/"), Some("wss://a.b".to_string()));
        assert_eq!(normalize_relay_url("wss://a.b/Path/"), Some("wss://a.b/Path".to_string()));
        assert_eq!(normalize_relay_url("https://a.b"), None);
        assert_eq!(normalize_relay_url("wss://"), None);
    }
}
