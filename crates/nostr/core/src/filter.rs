//! NIP-01 filters, with the NIP-50 `search` field.
//!
//! A [`Filter`] is used both as the body of a `REQ` and as a predicate over
//! locally stored events, so [`Filter::matches`] must agree with what a relay
//! would return:
//! - `ids` and `authors` match by prefix
//! - `since` and `until` are both inclusive
//! - every `#x` entry must be satisfied by at least one `x` tag value
//! - `search` is a case-insensitive match of every whitespace separated term
//!   against the content

use crate::nip01::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// NIP-01 filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event ids (or prefixes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys or prefixes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Events at or after this timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events at or before this timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Full text search terms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    /// Generic tag queries keyed with the `#` prefix (`#e`, `#p`, `#t`, ...).
    /// Ordered so the serialized form is deterministic.
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    /// Add a tag query. `name` may be given with or without the `#`.
    pub fn tag(mut self, name: &str, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let key = if name.starts_with('#') {
            name.to_string()
        } else {
            format!("#{}", name)
        };
        self.tags
            .entry(key)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Filter by `#e` tags.
    pub fn references_events(self, event_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("e", event_ids)
    }

    /// Filter by `#p` tags.
    pub fn references_pubkeys(self, pubkeys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tag("p", pubkeys)
    }

    /// Values of one tag query, looked up without the `#`.
    pub fn tag_query(&self, name: &str) -> Option<&[String]> {
        self.tags.get(&format!("#{}", name)).map(Vec::as_slice)
    }

    /// Copy of this filter without its time window and limit.
    pub fn without_window(&self) -> Self {
        Self {
            since: None,
            until: None,
            limit: None,
            ..self.clone()
        }
    }

    /// Check if an event matches this filter. `limit` is not considered.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref ids) = self.ids
            && !ids.iter().any(|id| event.id.starts_with(id.as_str()))
        {
            return false;
        }

        if let Some(ref authors) = self.authors
            && !authors.iter().any(|a| event.pubkey.starts_with(a.as_str()))
        {
            return false;
        }

        if let Some(ref kinds) = self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }

        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }

        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }

        for (key, values) in &self.tags {
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            let hit = event
                .tag_values(name)
                .any(|value| values.iter().any(|v| v == value));
            if !hit {
                return false;
            }
        }

        if let Some(ref query) = self.search
            && !search_matches(query, &event.content)
        {
            return false;
        }

        true
    }
}

/// Every term of `query` occurs in `content`, ignoring case. NIP-50
/// `key:value` extensions are skipped.
pub fn search_matches(query: &str, content: &str) -> bool {
    let haystack = content.to_lowercase();
    query
        .split_whitespace()
        .filter(|term| !term.contains(':'))
        .all(|term| haystack.contains(&term.to_lowercase()))
}
