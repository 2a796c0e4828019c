//! Replaceable and addressable event coordinates (formerly NIP-33, now part of NIP-01).
//!
//! For replaceable kinds only the newest event per `(kind, pubkey)` is kept; for
//! addressable kinds (30000-39999) the newest per `(kind, pubkey, d)`. The key is
//! rendered as a string so it can back a uniqueness constraint:
//!
//! ```text
//! <kind>:<pubkey>            replaceable
//! <kind>:<pubkey>:<d-value>  addressable
//! ```
//!
//! Only the first `d` tag counts. A missing `d` tag, and a `d` tag with no value,
//! both read as the empty string.

use crate::nip01::{Event, is_addressable_kind, is_replaceable_kind};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minimum kind for addressable events
pub const ADDRESSABLE_KIND_MIN: u16 = 30000;

/// Maximum kind for addressable events (inclusive)
pub const ADDRESSABLE_KIND_MAX: u16 = 39999;

/// Tag name for the d-identifier
pub const D_TAG: &str = "d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Nip33Error {
    #[error("invalid address format: {0}")]
    InvalidAddress(String),

    #[error("kind {0} is neither replaceable nor addressable")]
    NotReplaceable(u16),
}

/// `d` value of a tag list: first `d` tag wins, missing tag or value is `""`.
pub fn d_tag_value(tags: &[Vec<String>]) -> &str {
    tags.iter()
        .find(|tag| tag.first().map(String::as_str) == Some(D_TAG))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
        .unwrap_or("")
}

/// Replaceable id for the given parts, or `None` for kinds that are not replaceable.
pub fn replaceable_id(kind: u16, pubkey: &str, tags: &[Vec<String>]) -> Option<String> {
    if is_replaceable_kind(kind) {
        Some(format!("{}:{}", kind, pubkey))
    } else if is_addressable_kind(kind) {
        Some(format!("{}:{}:{}", kind, pubkey, d_tag_value(tags)))
    } else {
        None
    }
}

/// Replaceable id of an event.
pub fn event_replaceable_id(event: &Event) -> Option<String> {
    replaceable_id(event.kind, &event.pubkey, &event.tags)
}

/// A parsed `kind:pubkey[:d]` coordinate, as carried by `a` tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub kind: u16,
    pub pubkey: String,
    pub identifier: Option<String>,
}

impl Coordinate {
    pub fn replaceable(kind: u16, pubkey: impl Into<String>) -> Self {
        Self {
            kind,
            pubkey: pubkey.into(),
            identifier: None,
        }
    }

    pub fn addressable(kind: u16, pubkey: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            pubkey: pubkey.into(),
            identifier: Some(identifier.into()),
        }
    }

    /// The replaceable id this coordinate points at.
    pub fn replaceable_id(&self) -> Result<String, Nip33Error> {
        if is_addressable_kind(self.kind) {
            Ok(format!(
                "{}:{}:{}",
                self.kind,
                self.pubkey,
                self.identifier.as_deref().unwrap_or("")
            ))
        } else if is_replaceable_kind(self.kind) {
            Ok(format!("{}:{}", self.kind, self.pubkey))
        } else {
            Err(Nip33Error::NotReplaceable(self.kind))
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(d) => write!(f, "{}:{}:{}", self.kind, self.pubkey, d),
            None => write!(f, "{}:{}", self.kind, self.pubkey),
        }
    }
}

impl FromStr for Coordinate {
    type Err = Nip33Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The identifier may itself contain ':'.
        let mut parts = s.splitn(3, ':');
        let kind = parts
            .next()
            .and_then(|k| k.parse::<u16>().ok())
            .ok_or_else(|| Nip33Error::InvalidAddress(s.to_string()))?;
        let pubkey = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Nip33Error::InvalidAddress(s.to_string()))?;
        Ok(Self {
            kind,
            pubkey: pubkey.to_string(),
            identifier: parts.next().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PK: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn tags(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|t| t.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_replaceable_kind_ignores_d_tag() {
        assert_eq!(
            replaceable_id(0, PK, &tags(&[&["d", "x"]])),
            Some(format!("0:{}", PK))
        );
        assert_eq!(replaceable_id(10002, PK, &[]), Some(format!("10002:{}", PK)));
    }

    #[test]
    fn test_regular_and_ephemeral_have_no_id() {
        assert_eq!(replaceable_id(1, PK, &[]), None);
        assert_eq!(replaceable_id(20000, PK, &[]), None);
    }

    #[test]
    fn test_missing_and_empty_d_are_equivalent() {
        let empty_value = replaceable_id(30023, PK, &tags(&[&["d", ""]]));
        let no_tags = replaceable_id(30023, PK, &[]);
        let bare_d = replaceable_id(30023, PK, &tags(&[&["d"]]));
        assert_eq!(empty_value, no_tags);
        assert_eq!(no_tags, bare_d);
        assert_eq!(no_tags, Some(format!("30023:{}:", PK)));
    }

    #[test]
    fn test_first_d_tag_wins() {
        let two = replaceable_id(30023, PK, &tags(&[&["d", "x"], &["d", "y"]]));
        let one = replaceable_id(30023, PK, &tags(&[&["d", "x"]]));
        assert_eq!(two, one);
    }

    #[test]
    fn test_d_tag_after_other_tags() {
        let id = replaceable_id(30000, PK, &tags(&[&["p", "someone"], &["d", "list"]]));
        assert_eq!(id, Some(format!("30000:{}:list", PK)));
    }

    #[test]
    fn test_coordinate_parse_and_display() {
        let coord: Coordinate = format!("30023:{}:my:article", PK).parse().unwrap();
        assert_eq!(coord.kind, 30023);
        assert_eq!(coord.identifier.as_deref(), Some("my:article"));
        assert_eq!(coord.to_string(), format!("30023:{}:my:article", PK));

        let short: Coordinate = format!("3:{}", PK).parse().unwrap();
        assert_eq!(short.replaceable_id().unwrap(), format!("3:{}", PK));
    }

    #[test]
    fn test_coordinate_rejects_garbage() {
        assert!("nope".parse::<Coordinate>().is_err());
        assert!("1:".parse::<Coordinate>().is_err());
        assert_eq!(
            Coordinate::replaceable(1, PK).replaceable_id(),
            Err(Nip33Error::NotReplaceable(1))
        );
    }

    proptest! {
        #[test]
        fn prop_only_first_d_counts(first in "[a-z]{0,8}", rest in proptest::collection::vec("[a-z]{0,8}", 0..4)) {
            let mut with_extra = vec![vec!["d".to_string(), first.clone()]];
            for value in &rest {
                with_extra.push(vec!["d".to_string(), value.clone()]);
            }
            let single = vec![vec!["d".to_string(), first]];
            prop_assert_eq!(
                replaceable_id(30001, PK, &with_extra),
                replaceable_id(30001, PK, &single)
            );
        }
    }
}
