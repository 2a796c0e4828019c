//! Kind 0 profile metadata.

use serde::{Deserialize, Serialize};

/// The commonly used fields of a kind 0 content object. Unknown fields are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "displayName")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub nip05: Option<String>,
    #[serde(default)]
    pub lud16: Option<String>,
}

impl ProfileMetadata {
    /// Parse kind 0 content. Content that isn't a JSON object yields `None`.
    pub fn from_content(content: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(content).ok()?;
        if !value.is_object() {
            return None;
        }
        // Field-level type errors (e.g. a numeric name) shouldn't drop the rest.
        let field = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);
        Some(Self {
            name: field("name"),
            display_name: field("display_name").or_else(|| field("displayName")),
            about: field("about"),
            picture: field("picture"),
            nip05: field("nip05"),
            lud16: field("lud16"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile() {
        let meta = ProfileMetadata::from_content(
            r#"{"name":"alice","displayName":"Alice","about":5,"lud16":"a@b.c"}"#,
        )
        .unwrap();
        assert_eq!(meta.name.as_deref(), Some("alice"));
        assert_eq!(meta.display_name.as_deref(), Some("Alice"));
        assert_eq!(meta.about, None);
        assert_eq!(meta.lud16.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_non_object_rejected() {
        assert_eq!(ProfileMetadata::from_content("[1,2]"), None);
        assert_eq!(ProfileMetadata::from_content("nope"), None);
    }
}
