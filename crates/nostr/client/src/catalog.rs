//! Subscription intents and the wire filters they expand to.
//!
//! Applications describe what they want to follow as an [`Intent`]; the pool
//! only ever sees the resulting [`SubscriptionFilter`], which carries the
//! intent, a pagination window and the lifecycle flags that decide when the
//! pool tears the subscription down on its own.

use nostr::{
    Coordinate, Filter, KIND_CHANNEL_CREATION, KIND_CHANNEL_MESSAGE, KIND_CHANNEL_METADATA,
    KIND_CONTACTS, KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_GENERIC_REPOST, KIND_METADATA,
    KIND_REACTION, KIND_REPOST, KIND_SHORT_TEXT_NOTE, is_addressable_kind,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const FEED_KINDS: [u16; 3] = [KIND_SHORT_TEXT_NOTE, KIND_REPOST, KIND_GENERIC_REPOST];
const MENTION_KINDS: [u16; 5] = [
    KIND_SHORT_TEXT_NOTE,
    KIND_REPOST,
    KIND_REACTION,
    KIND_GENERIC_REPOST,
    KIND_CHANNEL_MESSAGE,
];

/// What the application wants from relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Events tagging a pubkey.
    Mentions { pubkey: String },
    /// Everything one author publishes that the engine reconciles.
    AuthorFeed { pubkey: String },
    EventById { id: String },
    EventsByIds { ids: Vec<String> },
    /// An event and everything referencing it.
    Thread { root_id: String },
    /// Messages in a public channel.
    Channel { channel_id: String },
    /// Direct messages between two pubkeys, both directions.
    DirectMessages { a: String, b: String },
    /// The current version of an addressable or replaceable event.
    Address(Coordinate),
    Replaceable { kind: u16, pubkey: String },
    /// NIP-50 free text search over notes.
    Search { query: String },
    Hashtag { hashtag: String },
    /// Profile metadata for a set of pubkeys.
    Profiles { pubkeys: Vec<String> },
    /// Creation and metadata events for a set of channels.
    Channels { ids: Vec<String> },
    /// Notes and reposts from followed authors.
    HomeFeed { authors: Vec<String> },
    Custom(Vec<Filter>),
}

impl Intent {
    /// Wire filters for this intent, before any window is applied.
    pub fn filters(&self) -> Vec<Filter> {
        match self {
            Intent::Mentions { pubkey } => vec![
                Filter::new()
                    .kinds(MENTION_KINDS)
                    .references_pubkeys([pubkey.as_str()]),
            ],
            Intent::AuthorFeed { pubkey } => vec![Filter::new().authors([pubkey.as_str()]).kinds([
                KIND_METADATA,
                KIND_SHORT_TEXT_NOTE,
                KIND_CONTACTS,
                KIND_REPOST,
                KIND_REACTION,
                KIND_GENERIC_REPOST,
            ])],
            Intent::EventById { id } => vec![Filter::new().ids([id.as_str()])],
            Intent::EventsByIds { ids } => vec![Filter::new().ids(ids.iter().map(String::as_str))],
            Intent::Thread { root_id } => vec![
                Filter::new().ids([root_id.as_str()]),
                Filter::new().references_events([root_id.as_str()]),
            ],
            Intent::Channel { channel_id } => vec![
                Filter::new()
                    .kinds([KIND_CHANNEL_MESSAGE])
                    .references_events([channel_id.as_str()]),
            ],
            Intent::DirectMessages { a, b } => vec![
                Filter::new()
                    .kinds([KIND_ENCRYPTED_DIRECT_MESSAGE])
                    .authors([a.as_str()])
                    .references_pubkeys([b.as_str()]),
                Filter::new()
                    .kinds([KIND_ENCRYPTED_DIRECT_MESSAGE])
                    .authors([b.as_str()])
                    .references_pubkeys([a.as_str()]),
            ],
            Intent::Address(coordinate) => {
                let filter = Filter::new()
                    .kinds([coordinate.kind])
                    .authors([coordinate.pubkey.as_str()]);
                if is_addressable_kind(coordinate.kind) {
                    vec![filter.tag("d", [coordinate.identifier.as_deref().unwrap_or("")])]
                } else {
                    vec![filter]
                }
            }
            Intent::Replaceable { kind, pubkey } => {
                vec![Filter::new().kinds([*kind]).authors([pubkey.as_str()])]
            }
            Intent::Search { query } => vec![
                Filter::new()
                    .kinds([KIND_SHORT_TEXT_NOTE])
                    .search(query.as_str()),
            ],
            Intent::Hashtag { hashtag } => vec![
                Filter::new()
                    .kinds([KIND_SHORT_TEXT_NOTE])
                    .tag("t", [hashtag.to_lowercase()]),
            ],
            Intent::Profiles { pubkeys } => vec![
                Filter::new()
                    .kinds([KIND_METADATA])
                    .authors(pubkeys.iter().map(String::as_str)),
            ],
            Intent::Channels { ids } => vec![
                Filter::new()
                    .kinds([KIND_CHANNEL_CREATION])
                    .ids(ids.iter().map(String::as_str)),
                Filter::new()
                    .kinds([KIND_CHANNEL_METADATA])
                    .references_events(ids.iter().map(String::as_str)),
            ],
            Intent::HomeFeed { authors } => vec![
                Filter::new()
                    .kinds(FEED_KINDS)
                    .authors(authors.iter().map(String::as_str)),
            ],
            Intent::Custom(filters) => filters.iter().map(Filter::without_window).collect(),
        }
    }

    /// Lookups that are complete once relays report end of stored events.
    fn is_one_shot(&self) -> bool {
        matches!(
            self,
            Intent::EventById { .. }
                | Intent::EventsByIds { .. }
                | Intent::Address(_)
                | Intent::Replaceable { .. }
                | Intent::Profiles { .. }
                | Intent::Channels { .. }
        )
    }
}

/// When the pool should tear a subscription down by itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lifecycle {
    /// Close on EOSE, and drop the filter once no relay carries it.
    pub destroy_on_eose: bool,
    /// Drop the filter globally on the first genuinely new event.
    pub destroy_on_first_event: bool,
    /// Drop the filter globally once an event arrives after this time.
    pub destroy_at: Option<u64>,
    /// Page backwards: narrow `until` to the oldest event seen per relay.
    pub preserve_oldest: bool,
}

/// Time window and size applied to every wire filter of an intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub id: Uuid,
    pub intent: Intent,
    pub window: Window,
    pub lifecycle: Lifecycle,
}

impl SubscriptionFilter {
    pub fn new(intent: Intent) -> Self {
        let lifecycle = Lifecycle {
            destroy_on_eose: intent.is_one_shot(),
            ..Lifecycle::default()
        };
        let window = match &intent {
            // Custom filters bring their own window, taken from the first one.
            Intent::Custom(filters) => filters
                .first()
                .map(|f| Window {
                    since: f.since,
                    until: f.until,
                    limit: f.limit,
                })
                .unwrap_or_default(),
            _ => Window::default(),
        };
        Self {
            id: Uuid::new_v4(),
            intent,
            window,
            lifecycle,
        }
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.window.limit = Some(limit);
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.window.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.window.until = Some(until);
        self
    }

    pub fn destroy_on_eose(mut self, enabled: bool) -> Self {
        self.lifecycle.destroy_on_eose = enabled;
        self
    }

    pub fn destroy_on_first_event(mut self) -> Self {
        self.lifecycle.destroy_on_first_event = true;
        self
    }

    pub fn destroy_at(mut self, deadline: u64) -> Self {
        self.lifecycle.destroy_at = Some(deadline);
        self
    }

    /// Fetch history backwards, resuming below the oldest event each relay has
    /// already returned for the same parameters.
    pub fn paginate(mut self) -> Self {
        self.lifecycle.preserve_oldest = true;
        self
    }

    /// Wire filters with the window applied.
    pub fn to_wire_filters(&self) -> Vec<Filter> {
        self.wire_filters_until(self.window.until)
    }

    /// Wire filters with `until` lowered to `oldest` if that is tighter.
    pub fn to_wire_filters_before(&self, oldest: Option<u64>) -> Vec<Filter> {
        let until = match (self.window.until, oldest) {
            (Some(until), Some(oldest)) => Some(until.min(oldest)),
            (until, oldest) => until.or(oldest),
        };
        self.wire_filters_until(until)
    }

    fn wire_filters_until(&self, until: Option<u64>) -> Vec<Filter> {
        self.intent
            .filters()
            .into_iter()
            .map(|mut filter| {
                filter.since = self.window.since;
                filter.until = until;
                filter.limit = self.window.limit;
                filter
            })
            .collect()
    }

    /// Content hash of the windowless wire filters. Two filters for the same
    /// intent share pagination state even though their ids differ.
    pub fn params_id(&self) -> String {
        let mut hasher = Sha256::new();
        for filter in self.intent.filters() {
            // Filter serialization is deterministic (tag keys are ordered).
            if let Ok(json) = serde_json::to_string(&filter.without_window()) {
                hasher.update(json.as_bytes());
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Same intent and lifecycle under a new id, with the time window reset.
    pub fn clone_fresh(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent: self.intent.clone(),
            window: Window {
                since: None,
                until: None,
                limit: self.window.limit,
            },
            lifecycle: self.lifecycle,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.lifecycle.destroy_at.is_some_and(|deadline| now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_one_shot_defaults() {
        assert!(
            SubscriptionFilter::new(Intent::EventById { id: "e".into() })
                .lifecycle
                .destroy_on_eose
        );
        assert!(
            SubscriptionFilter::new(Intent::Profiles {
                pubkeys: vec!["p".into()]
            })
            .lifecycle
            .destroy_on_eose
        );
        let live = SubscriptionFilter::new(Intent::Mentions { pubkey: "p".into() });
        assert_eq!(live.lifecycle, Lifecycle::default());
    }

    #[test]
    fn test_direct_messages_cover_both_directions() {
        let filters = Intent::DirectMessages {
            a: "alice".into(),
            b: "bob".into(),
        }
        .filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].authors, Some(vec!["alice".to_string()]));
        assert_eq!(filters[0].tag_query("p"), Some(&["bob".to_string()][..]));
        assert_eq!(filters[1].authors, Some(vec!["bob".to_string()]));
        assert_eq!(filters[1].tag_query("p"), Some(&["alice".to_string()][..]));
    }

    #[test]
    fn test_address_adds_d_tag_only_for_addressable_kinds() {
        let article = Intent::Address(Coordinate::addressable(30023, "pk", "post")).filters();
        assert_eq!(article[0].tag_query("d"), Some(&["post".to_string()][..]));

        let contacts = Intent::Address(Coordinate::replaceable(3, "pk")).filters();
        assert_eq!(contacts[0].tag_query("d"), None);
        assert_eq!(contacts[0].kinds, Some(vec![3]));
    }

    #[test]
    fn test_window_applies_to_every_wire_filter() {
        let sub = SubscriptionFilter::new(Intent::Thread {
            root_id: "root".into(),
        })
        .since(10)
        .until(20)
        .limit(50);

        for filter in sub.to_wire_filters() {
            assert_eq!(filter.since, Some(10));
            assert_eq!(filter.until, Some(20));
            assert_eq!(filter.limit, Some(50));
        }

        let narrowed = sub.to_wire_filters_before(Some(15));
        assert_eq!(narrowed[0].until, Some(15));
        let unchanged = sub.to_wire_filters_before(Some(30));
        assert_eq!(unchanged[0].until, Some(20));
    }

    #[test]
    fn test_params_id_ignores_window_and_id() {
        let intent = Intent::HomeFeed {
            authors: vec!["a".into(), "b".into()],
        };
        let first = SubscriptionFilter::new(intent.clone()).limit(20);
        let second = SubscriptionFilter::new(intent).since(5).until(9).paginate();
        assert_ne!(first.id, second.id);
        assert_eq!(first.params_id(), second.params_id());

        let other = SubscriptionFilter::new(Intent::HomeFeed {
            authors: vec!["a".into()],
        });
        assert_ne!(first.params_id(), other.params_id());
    }

    #[test]
    fn test_clone_fresh_resets_window_keeps_lifecycle() {
        let sub = SubscriptionFilter::new(Intent::Hashtag {
            hashtag: "Rust".into(),
        })
        .since(1)
        .until(2)
        .limit(30)
        .paginate();
        let fresh = sub.clone_fresh();

        assert_ne!(fresh.id, sub.id);
        assert_eq!(fresh.intent, sub.intent);
        assert_eq!(fresh.lifecycle, sub.lifecycle);
        assert_eq!(
            fresh.window,
            Window {
                since: None,
                until: None,
                limit: Some(30)
            }
        );
        assert_eq!(fresh.params_id(), sub.params_id());
        assert_eq!(sub.to_wire_filters()[0].tag_query("t"), Some(&["rust".to_string()][..]));
    }

    #[test]
    fn test_custom_filters_keep_their_window() {
        let sub = SubscriptionFilter::new(Intent::Custom(vec![
            Filter::new().kinds([1]).since(100).limit(5),
        ]));
        assert_eq!(sub.window.since, Some(100));
        assert_eq!(sub.window.limit, Some(5));
        assert_eq!(sub.to_wire_filters()[0], Filter::new().kinds([1]).since(100).limit(5));
    }

    #[test]
    fn test_destroy_at() {
        let sub = SubscriptionFilter::new(Intent::Search { query: "q".into() }).destroy_at(100);
        assert!(!sub.is_expired(99));
        assert!(sub.is_expired(100));
    }
}
