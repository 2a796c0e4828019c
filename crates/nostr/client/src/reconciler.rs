//! Desired subscriptions versus what each live relay actually carries.
//!
//! All bookkeeping sits behind one lock. Every method diffs and updates under
//! it and hands back the wire work (`REQ`s and `CLOSE`s) for the caller to send
//! once the lock is released.

use crate::catalog::SubscriptionFilter;
use nostr::Filter;
use nostr_store::RelayId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A `REQ` to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscribe {
    pub wire_id: String,
    pub filter_id: Uuid,
    pub filters: Vec<Filter>,
}

/// Wire work for one relay.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Plan {
    pub subscribe: Vec<Subscribe>,
    /// Wire ids to `CLOSE`.
    pub unsubscribe: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// A filter dropped from the desired set, with the `CLOSE`s that follow.
#[derive(Debug, Clone)]
pub struct Removed {
    pub filter: Arc<SubscriptionFilter>,
    pub closes: Vec<(RelayId, String)>,
}

#[derive(Debug, Default)]
pub struct EoseOutcome {
    /// Wire id to close on the relay that sent EOSE.
    pub close: Option<String>,
    pub removed: Option<Removed>,
}

#[derive(Debug, Default)]
pub struct EventRouting {
    /// The filter the subscription belongs to, if it is still live.
    pub filter: Option<Arc<SubscriptionFilter>>,
    pub removed: Option<Removed>,
}

#[derive(Default)]
struct RelaySubscriptions {
    read: bool,
    /// wire id -> filter id
    live: HashMap<String, Uuid>,
    /// Filters that finished (EOSE or CLOSED) on this connection and must not be
    /// requested again until it reconnects.
    settled: HashSet<Uuid>,
}

impl RelaySubscriptions {
    fn carries(&self, filter_id: Uuid) -> bool {
        self.live.values().any(|id| *id == filter_id)
    }
}

#[derive(Default)]
struct State {
    desired: BTreeMap<Uuid, Arc<SubscriptionFilter>>,
    relays: HashMap<RelayId, RelaySubscriptions>,
}

impl State {
    fn bindings(&self, filter_id: Uuid) -> usize {
        self.relays
            .values()
            .map(|subs| subs.live.values().filter(|id| **id == filter_id).count())
            .sum()
    }

    fn remove(&mut self, filter_id: Uuid) -> Option<Removed> {
        let filter = self.desired.remove(&filter_id)?;
        let mut closes = Vec::new();
        for (relay_id, subs) in &mut self.relays {
            subs.live.retain(|wire_id, id| {
                if *id == filter_id {
                    closes.push((*relay_id, wire_id.clone()));
                    false
                } else {
                    true
                }
            });
            subs.settled.remove(&filter_id);
        }
        closes.sort();
        Some(Removed { filter, closes })
    }
}

#[derive(Default)]
pub struct Reconciler {
    state: Mutex<State>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter to the desired set. Returns false if its id is already
    /// present.
    pub fn add_filter(&self, filter: SubscriptionFilter) -> bool {
        let mut state = self.state.lock();
        if state.desired.contains_key(&filter.id) {
            return false;
        }
        state.desired.insert(filter.id, Arc::new(filter));
        true
    }

    pub fn remove_filter(&self, filter_id: Uuid) -> Option<Removed> {
        self.state.lock().remove(filter_id)
    }

    pub fn contains(&self, filter_id: Uuid) -> bool {
        self.state.lock().desired.contains_key(&filter_id)
    }

    pub fn desired(&self) -> Vec<Arc<SubscriptionFilter>> {
        self.state.lock().desired.values().cloned().collect()
    }

    /// Number of live subscriptions carrying the filter across all relays.
    pub fn subscription_count(&self, filter_id: Uuid) -> usize {
        self.state.lock().bindings(filter_id)
    }

    /// Start tracking a freshly connected relay.
    pub fn attach(&self, relay_id: RelayId, read: bool) {
        self.state.lock().relays.insert(
            relay_id,
            RelaySubscriptions {
                read,
                ..RelaySubscriptions::default()
            },
        );
    }

    /// Forget everything about a relay's connection.
    pub fn detach(&self, relay_id: RelayId) {
        self.state.lock().relays.remove(&relay_id);
    }

    pub fn attached(&self) -> Vec<RelayId> {
        let mut ids: Vec<_> = self.state.lock().relays.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn set_read(&self, relay_id: RelayId, read: bool) {
        if let Some(subs) = self.state.lock().relays.get_mut(&relay_id) {
            subs.read = read;
        }
    }

    /// Diff the desired set against one relay.
    ///
    /// Subscriptions whose filter is gone are closed. New ones are only planned
    /// when `allow_subscribe` is set and the relay is readable; `oldest` gives
    /// the oldest timestamp already seen on this relay for a params id. Planned
    /// subscriptions are recorded immediately.
    pub fn plan(
        &self,
        relay_id: RelayId,
        allow_subscribe: bool,
        oldest: impl Fn(&str) -> Option<u64>,
    ) -> Plan {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(subs) = state.relays.get_mut(&relay_id) else {
            return Plan::default();
        };

        let mut plan = Plan::default();
        subs.live.retain(|wire_id, filter_id| {
            if state.desired.contains_key(filter_id) {
                true
            } else {
                plan.unsubscribe.push(wire_id.clone());
                false
            }
        });
        plan.unsubscribe.sort();

        if !allow_subscribe || !subs.read {
            return plan;
        }

        for (filter_id, filter) in &state.desired {
            if subs.settled.contains(filter_id) || subs.carries(*filter_id) {
                continue;
            }
            let filters = if filter.lifecycle.preserve_oldest {
                filter.to_wire_filters_before(oldest(&filter.params_id()))
            } else {
                filter.to_wire_filters()
            };
            let wire_id = Uuid::new_v4().simple().to_string();
            subs.live.insert(wire_id.clone(), *filter_id);
            plan.subscribe.push(Subscribe {
                wire_id,
                filter_id: *filter_id,
                filters,
            });
        }

        if !plan.is_empty() {
            debug!(
                relay_id,
                subscribe = plan.subscribe.len(),
                unsubscribe = plan.unsubscribe.len(),
                "reconcile plan"
            );
        }
        plan
    }

    pub fn filter_for(&self, relay_id: RelayId, wire_id: &str) -> Option<Arc<SubscriptionFilter>> {
        let state = self.state.lock();
        let filter_id = state.relays.get(&relay_id)?.live.get(wire_id)?;
        state.desired.get(filter_id).cloned()
    }

    /// The relay finished sending stored events for a subscription.
    pub fn on_eose(&self, relay_id: RelayId, wire_id: &str) -> EoseOutcome {
        let mut state = self.state.lock();
        let Some(filter) = state
            .relays
            .get(&relay_id)
            .and_then(|subs| subs.live.get(wire_id))
            .and_then(|id| state.desired.get(id))
            .cloned()
        else {
            return EoseOutcome::default();
        };
        if !filter.lifecycle.destroy_on_eose {
            return EoseOutcome::default();
        }

        if let Some(subs) = state.relays.get_mut(&relay_id) {
            subs.live.remove(wire_id);
            subs.settled.insert(filter.id);
        }
        let removed = if state.bindings(filter.id) == 0 {
            state.remove(filter.id)
        } else {
            None
        };
        EoseOutcome {
            close: Some(wire_id.to_string()),
            removed,
        }
    }

    /// The relay refused or ended a subscription with `CLOSED`.
    pub fn on_closed(&self, relay_id: RelayId, wire_id: &str) -> Option<Removed> {
        let mut state = self.state.lock();
        let filter_id = state.relays.get_mut(&relay_id)?.live.remove(wire_id)?;
        if let Some(subs) = state.relays.get_mut(&relay_id) {
            subs.settled.insert(filter_id);
        }
        let one_shot = state
            .desired
            .get(&filter_id)
            .is_some_and(|f| f.lifecycle.destroy_on_eose);
        if one_shot && state.bindings(filter_id) == 0 {
            state.remove(filter_id)
        } else {
            None
        }
    }

    /// Route an event received on a subscription and apply the lifecycle
    /// rules that fire on events.
    pub fn on_event(&self, relay_id: RelayId, wire_id: &str, is_new: bool, now: u64) -> EventRouting {
        let mut state = self.state.lock();
        let Some(filter) = state
            .relays
            .get(&relay_id)
            .and_then(|subs| subs.live.get(wire_id))
            .and_then(|id| state.desired.get(id))
            .cloned()
        else {
            return EventRouting::default();
        };

        let remove = (is_new && filter.lifecycle.destroy_on_first_event) || filter.is_expired(now);
        let removed = if remove { state.remove(filter.id) } else { None };
        EventRouting {
            filter: Some(filter),
            removed,
        }
    }

    /// Drop every filter whose deadline has passed.
    pub fn expire(&self, now: u64) -> Vec<Removed> {
        let mut state = self.state.lock();
        let expired: Vec<Uuid> = state
            .desired
            .values()
            .filter(|f| f.is_expired(now))
            .map(|f| f.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| state.remove(id))
            .collect()
    }
}
